use super::authorization::{Action, authorize};
use crate::config::EngineConfig;
use crate::domain::actor::Actor;
use crate::domain::admission::Admission;
use crate::domain::application::Application;
use crate::domain::ids::{PaymentReference, ProgramId, UserId};
use crate::domain::money::Amount;
use crate::domain::payment::{
    FailureReason, Payment, PaymentStatus, PaymentTarget, PaymentType, generate_reference,
};
use crate::domain::ports::{
    ChargeRequest, ChargeSession, ChargeStatus, ChargeVerification, Constraint, GatewayError,
    LedgerBatch, RecordKind, SharedClock, SharedGateway, SharedLedger, StoreError,
};
use crate::domain::program::Program;
use crate::error::{AdmissionError, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::future::Future;

/// A freshly initialized charge: the stored pending payment plus what the payer needs
/// to complete it at the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct InitializedPayment {
    pub payment: Payment,
    pub session: ChargeSession,
}

/// Per-reference result of a pending re-poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub reference: PaymentReference,
    pub status: PaymentStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingReport {
    pub outcomes: Vec<ReconcileOutcome>,
}

impl PendingReport {
    pub fn count(&self, status: PaymentStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// What a verification means for a still-pending payment.
enum Verdict {
    Settle { paid_at: DateTime<Utc> },
    Fail(FailureReason),
    Wait,
}

/// The entity a charge is being raised against, loaded once per request.
struct Obligation {
    application: Application,
    admission: Option<Admission>,
}

impl Obligation {
    fn payer(&self) -> UserId {
        self.application.applicant_id
    }
}

/// Creates pending payments and folds gateway verdicts back into the ledger.
///
/// Settling a payment and setting its target's flag is one batch. Two reconciliations of
/// the same reference race on the payment's version; the loser re-reads, finds the
/// payment terminal and replays the stored result.
pub struct ReconciliationEngine {
    ledger: SharedLedger,
    gateway: SharedGateway,
    clock: SharedClock,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: SharedLedger,
        gateway: SharedGateway,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            clock,
            config,
        }
    }

    /// Opens a charge for `payment_type` against `target`.
    ///
    /// The amount always comes from the fee schedule or the admission offer. If the
    /// gateway call fails or times out nothing is stored.
    pub async fn initialize(
        &self,
        actor: &Actor,
        payment_type: PaymentType,
        target: PaymentTarget,
    ) -> Result<InitializedPayment> {
        let obligation = self.load_obligation(target).await?;
        match &obligation.admission {
            Some(admission) => authorize(actor, Action::PaymentInitialize, admission)?,
            None => authorize(actor, Action::PaymentInitialize, &obligation.application)?,
        }

        let rule = payment_type.rule();
        if target.kind() != rule.target {
            return Err(AdmissionError::InvalidState {
                payment_type,
                reason: format!("{payment_type} cannot be charged against {target}"),
            });
        }

        let already_paid = match &obligation.admission {
            Some(admission) => rule.flag_set_on_admission(admission),
            None => rule.flag_set_on_application(&obligation.application),
        };
        if already_paid
            || self
                .ledger
                .successful_payment(obligation.payer(), target, payment_type)
                .await?
                .is_some()
        {
            tracing::debug!(%target, %payment_type, "obligation already satisfied");
            return Err(AdmissionError::AlreadySatisfied(payment_type));
        }

        let now = self.clock.now();
        let (amount, currency) = match &obligation.admission {
            Some(admission) => {
                if !rule.admission_ready(admission) {
                    return Err(AdmissionError::InvalidState {
                        payment_type,
                        reason: format!("admission is {}", admission.status),
                    });
                }
                if admission.is_overdue(now) {
                    return Err(AdmissionError::OfferExpired(admission.id));
                }
                (admission.acceptance_fee_amount, admission.currency.clone())
            }
            None => {
                let application = &obligation.application;
                if !rule.application_ready(application) {
                    return Err(AdmissionError::InvalidState {
                        payment_type,
                        reason: format!("application is {}", application.status),
                    });
                }
                let program = self.load_program(application.program_id).await?;
                (
                    self.fee_for(payment_type, &program),
                    self.config.fees.currency.clone(),
                )
            }
        };

        let email = obligation.application.profile.email.trim().to_string();
        if email.is_empty() {
            return Err(AdmissionError::ValidationError(
                "payer email is required to open a charge".to_string(),
            ));
        }

        let reference = generate_reference(payment_type);
        let metadata = json!({
            "reference": reference.as_str(),
            "payment_type": payment_type.label(),
            "target": target.to_string(),
            "application_number": obligation.application.number.as_str(),
        });
        let request = ChargeRequest {
            reference: reference.clone(),
            amount,
            currency: currency.clone(),
            email,
            metadata: metadata.clone(),
        };
        let session = self.call_gateway(self.gateway.initialize(request)).await?;

        let mut payment = Payment {
            reference,
            gateway_reference: session.gateway_reference.clone(),
            payer_id: obligation.payer(),
            application_id: obligation.application.id,
            admission_id: obligation.admission.as_ref().map(|a| a.id),
            payment_type,
            amount,
            currency,
            status: PaymentStatus::Pending,
            description: format!(
                "{} for {}",
                payment_type.label(),
                obligation.application.number
            ),
            metadata,
            failure: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        match self
            .ledger
            .commit(LedgerBatch::new().put_payment(payment.clone()))
            .await
        {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(
                Constraint::RecordKey(RecordKind::Payment) | Constraint::GatewayReference,
            )) => return Err(AdmissionError::AlreadySatisfied(payment_type)),
            Err(err) => return Err(err.into()),
        }
        payment.version += 1;

        tracing::info!(
            reference = %payment.reference,
            gateway_reference = %payment.gateway_reference,
            %target,
            %payment_type,
            amount = %payment.amount,
            currency = %payment.currency,
            "payment initialized"
        );
        Ok(InitializedPayment { payment, session })
    }

    /// Reconciles on behalf of `actor`, who must own the payment or hold `payment.verify`.
    pub async fn verify(&self, actor: &Actor, reference: &PaymentReference) -> Result<Payment> {
        let payment = self.load_payment(reference).await?;
        authorize(actor, Action::PaymentVerify, &payment)?;
        self.reconcile(reference).await
    }

    /// Brings a payment to its authoritative state. Idempotent: a terminal payment
    /// returns its stored result without contacting the gateway.
    pub async fn reconcile(&self, reference: &PaymentReference) -> Result<Payment> {
        let payment = self.load_payment(reference).await?;
        if payment.status.is_terminal() {
            tracing::debug!(%reference, status = %payment.status, "payment already terminal");
            return replay(payment);
        }

        let verification = self
            .call_gateway(self.gateway.verify(&payment.gateway_reference))
            .await?;
        retry_stale!(
            self.config.write_attempts,
            self.try_apply(reference, &verification)
        )
    }

    /// Re-polls every pending payment, typically after a gateway outage.
    pub async fn reconcile_pending(&self) -> Result<PendingReport> {
        let pending = self.ledger.payments_with_status(PaymentStatus::Pending).await?;
        let mut report = PendingReport::default();

        for payment in pending {
            let outcome = match self.reconcile(&payment.reference).await {
                Ok(settled) => ReconcileOutcome {
                    reference: settled.reference,
                    status: settled.status,
                    detail: None,
                },
                Err(err) => {
                    let status = match &err {
                        AdmissionError::PaymentFailed(_)
                        | AdmissionError::AmountMismatch { .. }
                        | AdmissionError::AlreadySatisfied(_) => PaymentStatus::Failed,
                        _ => PaymentStatus::Pending,
                    };
                    ReconcileOutcome {
                        reference: payment.reference,
                        status,
                        detail: Some(err.to_string()),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        tracing::info!(
            total = report.outcomes.len(),
            successful = report.count(PaymentStatus::Successful),
            failed = report.count(PaymentStatus::Failed),
            pending = report.count(PaymentStatus::Pending),
            "pending payments reconciled"
        );
        Ok(report)
    }

    async fn try_apply(
        &self,
        reference: &PaymentReference,
        verification: &ChargeVerification,
    ) -> Result<Payment> {
        let mut payment = self.load_payment(reference).await?;
        if payment.status.is_terminal() {
            return replay(payment);
        }

        let now = self.clock.now();
        match self.judge(&payment, verification, now) {
            Verdict::Fail(reason) => {
                payment.mark_failed(reason, now);
                let payment = self.save_payment(payment).await?;
                tracing::info!(%reference, failure = ?payment.failure, "payment failed");
                replay(payment)
            }
            Verdict::Settle { paid_at } => self.settle(payment, paid_at, now).await,
            Verdict::Wait => {
                tracing::debug!(%reference, "gateway still processing charge");
                Err(AdmissionError::PaymentPending(reference.clone()))
            }
        }
    }

    fn judge(
        &self,
        payment: &Payment,
        verification: &ChargeVerification,
        now: DateTime<Utc>,
    ) -> Verdict {
        match verification.status {
            ChargeStatus::Success => {
                if payment.amount.matches(verification.amount)
                    && payment.currency.matches(&verification.currency)
                {
                    Verdict::Settle {
                        paid_at: verification.paid_at.unwrap_or(now),
                    }
                } else {
                    tracing::error!(
                        reference = %payment.reference,
                        expected_amount = %payment.amount,
                        expected_currency = %payment.currency,
                        reported_amount = %verification.amount,
                        reported_currency = %verification.currency,
                        "gateway settled a different amount than was charged"
                    );
                    Verdict::Fail(FailureReason::AmountMismatch {
                        reported_amount: verification.amount,
                        reported_currency: verification.currency.clone(),
                    })
                }
            }
            ChargeStatus::Failed | ChargeStatus::Unknown => {
                Verdict::Fail(FailureReason::GatewayDeclined)
            }
            ChargeStatus::Processing => Verdict::Wait,
        }
    }

    /// Marks the payment successful and sets the target's flag in one batch.
    async fn settle(
        &self,
        mut payment: Payment,
        paid_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Payment> {
        let rule = payment.payment_type.rule();
        let target = payment.target();
        let mut batch = LedgerBatch::new();

        let already_paid = match target {
            PaymentTarget::Application(id) => {
                let mut application = self
                    .ledger
                    .application(id)
                    .await?
                    .ok_or_else(|| AdmissionError::not_found(RecordKind::Application, id))?;
                let already = rule.flag_set_on_application(&application);
                rule.settle_application(&mut application);
                application.updated_at = now;
                batch = batch.put_application(application);
                already
            }
            PaymentTarget::Admission(id) => {
                let mut admission = self
                    .ledger
                    .admission(id)
                    .await?
                    .ok_or_else(|| AdmissionError::not_found(RecordKind::Admission, id))?;
                let already = rule.flag_set_on_admission(&admission);
                rule.settle_admission(&mut admission);
                batch = batch.put_admission(admission);
                already
            }
        };
        if already_paid {
            return self.reject_duplicate(payment, now).await;
        }

        payment.mark_successful(paid_at);
        match self.ledger.commit(batch.put_payment(payment.clone())).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(Constraint::SuccessfulPayment)) => {
                payment.paid_at = None;
                return self.reject_duplicate(payment, now).await;
            }
            Err(err) => return Err(err.into()),
        }
        payment.version += 1;

        tracing::info!(
            reference = %payment.reference,
            %target,
            payment_type = %payment.payment_type,
            "payment settled"
        );
        Ok(payment)
    }

    async fn reject_duplicate(&self, mut payment: Payment, now: DateTime<Utc>) -> Result<Payment> {
        payment.mark_failed(FailureReason::DuplicateSettlement, now);
        let payment = self.save_payment(payment).await?;
        tracing::error!(
            reference = %payment.reference,
            payer = %payment.payer_id,
            amount = %payment.amount,
            currency = %payment.currency,
            "obligation was already paid, payment needs a refund"
        );
        replay(payment)
    }

    fn fee_for(&self, payment_type: PaymentType, program: &Program) -> Amount {
        match payment_type {
            PaymentType::FormPurchase => self.config.fees.form_fee(program),
            PaymentType::AdmissionFee => self.config.fees.admission_fee(program),
            PaymentType::AcceptanceFee => self.config.fees.acceptance_fee(program),
        }
    }

    async fn call_gateway<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> Result<T> {
        let err = match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => GatewayError::Timeout,
        };
        tracing::warn!(error = %err, "payment gateway call failed");
        Err(AdmissionError::GatewayUnavailable(err.to_string()))
    }

    async fn load_obligation(&self, target: PaymentTarget) -> Result<Obligation> {
        match target {
            PaymentTarget::Application(id) => {
                let application = self
                    .ledger
                    .application(id)
                    .await?
                    .ok_or_else(|| AdmissionError::not_found(RecordKind::Application, id))?;
                Ok(Obligation {
                    application,
                    admission: None,
                })
            }
            PaymentTarget::Admission(id) => {
                let admission = self
                    .ledger
                    .admission(id)
                    .await?
                    .ok_or_else(|| AdmissionError::not_found(RecordKind::Admission, id))?;
                let application = self
                    .ledger
                    .application(admission.application_id)
                    .await?
                    .ok_or_else(|| {
                        AdmissionError::not_found(RecordKind::Application, admission.application_id)
                    })?;
                Ok(Obligation {
                    application,
                    admission: Some(admission),
                })
            }
        }
    }

    async fn save_payment(&self, mut payment: Payment) -> Result<Payment> {
        self.ledger
            .commit(LedgerBatch::new().put_payment(payment.clone()))
            .await?;
        payment.version += 1;
        Ok(payment)
    }

    async fn load_payment(&self, reference: &PaymentReference) -> Result<Payment> {
        self.ledger
            .payment(reference)
            .await?
            .ok_or_else(|| AdmissionError::not_found(RecordKind::Payment, reference))
    }

    async fn load_program(&self, id: ProgramId) -> Result<Program> {
        self.ledger
            .program(id)
            .await?
            .ok_or_else(|| AdmissionError::not_found(RecordKind::Program, id))
    }
}

/// The result a terminal payment stands for.
fn replay(payment: Payment) -> Result<Payment> {
    match (payment.status, &payment.failure) {
        (PaymentStatus::Successful, _) => Ok(payment),
        (
            PaymentStatus::Failed,
            Some(FailureReason::AmountMismatch {
                reported_amount,
                reported_currency,
            }),
        ) => Err(AdmissionError::AmountMismatch {
            reference: payment.reference.clone(),
            expected_amount: payment.amount.value(),
            expected_currency: payment.currency.to_string(),
            reported_amount: *reported_amount,
            reported_currency: reported_currency.clone(),
        }),
        (PaymentStatus::Failed, Some(FailureReason::DuplicateSettlement)) => {
            Err(AdmissionError::AlreadySatisfied(payment.payment_type))
        }
        (PaymentStatus::Failed, _) => Err(AdmissionError::PaymentFailed(payment.reference)),
        (PaymentStatus::Pending, _) => Err(AdmissionError::PaymentPending(payment.reference)),
    }
}
