#![allow(dead_code)]

use admissions::application::authorization::permissions;
use admissions::application::lifecycle::{LifecycleEngine, Offer};
use admissions::application::reconciliation::ReconciliationEngine;
use admissions::config::EngineConfig;
use admissions::domain::actor::{Actor, ActorKind};
use admissions::domain::admission::Admission;
use admissions::domain::application::{
    ApplicantProfile, Application, NewApplication, Qualification,
};
use admissions::domain::ids::{GatewayReference, ProgramId, UserId};
use admissions::domain::payment::{Payment, PaymentTarget, PaymentType};
use admissions::domain::ports::{
    ChargeRequest, ChargeSession, ChargeStatus, ChargeVerification, Clock, GatewayError,
    LedgerStore, PaymentGateway, SharedLedger,
};
use admissions::domain::program::Program;
use admissions::infrastructure::clock::ManualClock;
use admissions::infrastructure::in_memory::{InMemoryLedger, InMemoryPermissionResolver};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A gateway whose verdicts are scripted per reference. Unscripted charges report
/// `Processing`, as a real gateway does before the payer finishes.
#[derive(Default)]
pub struct ScriptedGateway {
    verdicts: Mutex<HashMap<GatewayReference, ChargeVerification>>,
    down: AtomicBool,
    delay: Mutex<Option<Duration>>,
    initialize_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn report(
        &self,
        reference: &GatewayReference,
        status: ChargeStatus,
        amount: Decimal,
        currency: &str,
    ) {
        self.verdicts.lock().unwrap().insert(
            reference.clone(),
            ChargeVerification {
                status,
                amount,
                currency: currency.to_string(),
                paid_at: Some(Utc::now()),
            },
        );
    }

    /// Scripts a successful charge of exactly what the payment recorded.
    pub fn settle(&self, payment: &Payment) {
        self.report(
            &payment.gateway_reference,
            ChargeStatus::Success,
            payment.amount.value(),
            payment.currency.as_str(),
        );
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_up(&self) -> Result<(), GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initialize(&self, request: ChargeRequest) -> Result<ChargeSession, GatewayError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check_up()?;
        Ok(ChargeSession {
            gateway_reference: GatewayReference::new(format!("PSK-{}", request.reference)),
            authorization_url: format!("https://checkout.example/{}", request.reference),
            access_code: Some("access".to_string()),
        })
    }

    async fn verify(&self, reference: &GatewayReference) -> Result<ChargeVerification, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check_up()?;
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or(ChargeVerification {
                status: ChargeStatus::Processing,
                amount: Decimal::ZERO,
                currency: String::new(),
                paid_at: None,
            }))
    }
}

pub struct Harness {
    pub ledger: SharedLedger,
    pub gateway: Arc<ScriptedGateway>,
    pub clock: ManualClock,
    pub lifecycle: LifecycleEngine,
    pub payments: ReconciliationEngine,
    pub program: Program,
    pub staff: Actor,
}

pub fn config() -> EngineConfig {
    EngineConfig {
        gateway_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    }
}

/// Staff holding every review, offer and payment permission.
pub async fn staff() -> Actor {
    let staff_id = UserId::new();
    let resolver = InMemoryPermissionResolver::new();
    resolver
        .grant(
            staff_id,
            [
                permissions::APPLICATION_REVIEW,
                permissions::APPLICATION_APPROVE,
                permissions::ADMISSION_UPLOAD,
                permissions::PAYMENT_VERIFY,
            ]
            .into_iter()
            .collect(),
        )
        .await;
    Actor::resolve(&resolver, staff_id, ActorKind::Staff)
        .await
        .unwrap()
}

pub fn new_application(applicant: UserId, program_id: ProgramId) -> NewApplication {
    NewApplication {
        applicant_id: applicant,
        session: "2025".to_string(),
        program_id,
        profile: ApplicantProfile {
            first_name: "Amaka".to_string(),
            last_name: "Eze".to_string(),
            email: "amaka@example.com".to_string(),
            phone: "+2348030000000".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2006, 2, 14),
            ..Default::default()
        },
        qualifications: vec![Qualification {
            institution: "Queens College".to_string(),
            certificate: "WAEC".to_string(),
            grade: Some("A1".to_string()),
            year: 2024,
        }],
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_ledger(Arc::new(InMemoryLedger::new())).await
    }

    pub async fn with_ledger(ledger: SharedLedger) -> Self {
        let gateway = Arc::new(ScriptedGateway::default());
        let clock = ManualClock::new(Utc::now());

        let program = Program::new("Computer Science");
        ledger.put_program(program.clone()).await.unwrap();

        let staff = staff().await;

        let lifecycle = LifecycleEngine::new(ledger.clone(), Arc::new(clock.clone()), config());
        let payments = ReconciliationEngine::new(
            ledger.clone(),
            gateway.clone(),
            Arc::new(clock.clone()),
            config(),
        );

        Self {
            ledger,
            gateway,
            clock,
            lifecycle,
            payments,
            program,
            staff,
        }
    }

    pub fn new_application(&self, applicant: UserId) -> NewApplication {
        new_application(applicant, self.program.id)
    }

    pub async fn draft(&self) -> (Actor, Application) {
        let applicant = Actor::applicant(UserId::new());
        let application = self
            .lifecycle
            .create_application(&applicant, self.new_application(applicant.id))
            .await
            .unwrap();
        (applicant, application)
    }

    /// Initializes a charge and has the gateway settle it for the exact amount.
    pub async fn pay(&self, payer: &Actor, payment_type: PaymentType, target: PaymentTarget) -> Payment {
        let initialized = self
            .payments
            .initialize(payer, payment_type, target)
            .await
            .unwrap();
        self.gateway.settle(&initialized.payment);
        self.payments
            .reconcile(&initialized.payment.reference)
            .await
            .unwrap()
    }

    pub async fn under_review(&self) -> (Actor, Application) {
        let (applicant, application) = self.draft().await;
        self.pay(
            &applicant,
            PaymentType::FormPurchase,
            PaymentTarget::Application(application.id),
        )
        .await;
        self.lifecycle
            .submit_application(&applicant, application.id)
            .await
            .unwrap();
        let application = self
            .lifecycle
            .begin_review(&self.staff, application.id)
            .await
            .unwrap();
        (applicant, application)
    }

    pub async fn offered(&self) -> (Actor, Offer) {
        let (applicant, application) = self.under_review().await;
        let offer = self
            .lifecycle
            .approve_application(&self.staff, application.id, None)
            .await
            .unwrap();
        (applicant, offer)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn admission(&self, admission: &Admission) -> Admission {
        self.ledger.admission(admission.id).await.unwrap().unwrap()
    }

    pub async fn application(&self, application: &Application) -> Application {
        self.ledger.application(application.id).await.unwrap().unwrap()
    }
}
