mod common;

use admissions::application::lifecycle::LifecycleEngine;
use admissions::application::reconciliation::ReconciliationEngine;
use admissions::domain::actor::Actor;
use admissions::domain::ids::UserId;
use admissions::domain::payment::{PaymentStatus, PaymentTarget, PaymentType};
use admissions::domain::ports::{SharedClock, SharedGateway, SharedLedger};
use admissions::domain::program::Program;
use admissions::infrastructure::clock::SystemClock;
use admissions::infrastructure::in_memory::InMemoryLedger;
use common::{ScriptedGateway, config, new_application};
use std::sync::Arc;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let ledger: SharedLedger = Arc::new(InMemoryLedger::new());
    let scripted = Arc::new(ScriptedGateway::default());
    let gateway: SharedGateway = scripted.clone();
    let clock: SharedClock = Arc::new(SystemClock);

    let program = Program::new("Law");
    ledger.put_program(program.clone()).await.unwrap();

    let lifecycle = LifecycleEngine::new(ledger.clone(), clock.clone(), config());
    let payments = ReconciliationEngine::new(ledger.clone(), gateway, clock, config());

    let applicant = Actor::applicant(UserId::new());
    let application = lifecycle
        .create_application(&applicant, new_application(applicant.id, program.id))
        .await
        .unwrap();

    // Verify Send + Sync by driving the engines from spawned tasks
    let init_handle = tokio::spawn(async move {
        payments
            .initialize(
                &applicant,
                PaymentType::FormPurchase,
                PaymentTarget::Application(application.id),
            )
            .await
            .map(|initialized| (payments, initialized.payment))
    });
    let (payments, payment) = init_handle.await.unwrap().unwrap();
    scripted.settle(&payment);

    let verify_handle = tokio::spawn(async move { payments.reconcile(&payment.reference).await });
    let settled = verify_handle.await.unwrap().unwrap();
    assert_eq!(settled.status, PaymentStatus::Successful);

    let stored = ledger.application(application.id).await.unwrap().unwrap();
    assert!(stored.form_paid);
}
