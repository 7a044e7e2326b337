use super::actor::Owned;
use super::admission::{Admission, AdmissionStatus};
use super::application::{Application, ApplicationStatus};
use super::ids::{AdmissionId, ApplicationId, GatewayReference, PaymentReference, UserId};
use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    FormPurchase,
    AdmissionFee,
    AcceptanceFee,
}

impl PaymentType {
    pub fn rule(self) -> &'static PaymentRule {
        match self {
            PaymentType::FormPurchase => &PAYMENT_RULES[0],
            PaymentType::AdmissionFee => &PAYMENT_RULES[1],
            PaymentType::AcceptanceFee => &PAYMENT_RULES[2],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PaymentType::FormPurchase => "form_purchase",
            PaymentType::AdmissionFee => "admission_fee",
            PaymentType::AcceptanceFee => "acceptance_fee",
        }
    }

    fn reference_prefix(self) -> &'static str {
        match self {
            PaymentType::FormPurchase => "FRM",
            PaymentType::AdmissionFee => "ADF",
            PaymentType::AcceptanceFee => "ACF",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        self != PaymentStatus::Pending
    }

    pub fn label(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a payment ended in `Failed`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The gateway reported the charge failed, or did not know the reference.
    GatewayDeclined,
    /// The gateway settled a different amount or currency than was recorded.
    AmountMismatch {
        reported_amount: Decimal,
        reported_currency: String,
    },
    /// The obligation was already satisfied by another payment; needs a refund.
    DuplicateSettlement,
}

/// The entity whose obligation a payment settles.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PaymentTarget {
    Application(ApplicationId),
    Admission(AdmissionId),
}

impl PaymentTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            PaymentTarget::Application(_) => TargetKind::Application,
            PaymentTarget::Admission(_) => TargetKind::Admission,
        }
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentTarget::Application(id) => write!(f, "application:{id}"),
            PaymentTarget::Admission(id) => write!(f, "admission:{id}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TargetKind {
    Application,
    Admission,
}

/// The owning-entity flag a successful payment sets.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SettlementFlag {
    FormPaid,
    AdmissionFeePaid,
    AcceptanceFeePaid,
}

/// Lifecycle state the target must be in for a charge to be initialized.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RequiredState {
    Application(ApplicationStatus),
    Admission(AdmissionStatus),
}

/// Single definition of what each payment type pays for.
///
/// Both initialization and reconciliation consult this table, so the target kind, the
/// flag that gets set and the state that must hold cannot drift apart.
#[derive(Debug, PartialEq, Eq)]
pub struct PaymentRule {
    pub payment_type: PaymentType,
    pub target: TargetKind,
    pub flag: SettlementFlag,
    pub required: RequiredState,
}

pub static PAYMENT_RULES: [PaymentRule; 3] = [
    PaymentRule {
        payment_type: PaymentType::FormPurchase,
        target: TargetKind::Application,
        flag: SettlementFlag::FormPaid,
        required: RequiredState::Application(ApplicationStatus::Draft),
    },
    PaymentRule {
        payment_type: PaymentType::AdmissionFee,
        target: TargetKind::Application,
        flag: SettlementFlag::AdmissionFeePaid,
        required: RequiredState::Application(ApplicationStatus::Approved),
    },
    PaymentRule {
        payment_type: PaymentType::AcceptanceFee,
        target: TargetKind::Admission,
        flag: SettlementFlag::AcceptanceFeePaid,
        required: RequiredState::Admission(AdmissionStatus::Offered),
    },
];

impl PaymentRule {
    pub fn flag_set_on_application(&self, application: &Application) -> bool {
        match self.flag {
            SettlementFlag::FormPaid => application.form_paid,
            SettlementFlag::AdmissionFeePaid => application.admission_fee_paid,
            SettlementFlag::AcceptanceFeePaid => false,
        }
    }

    pub fn flag_set_on_admission(&self, admission: &Admission) -> bool {
        self.flag == SettlementFlag::AcceptanceFeePaid && admission.acceptance_fee_paid
    }

    pub fn settle_application(&self, application: &mut Application) {
        match self.flag {
            SettlementFlag::FormPaid => application.form_paid = true,
            SettlementFlag::AdmissionFeePaid => application.admission_fee_paid = true,
            SettlementFlag::AcceptanceFeePaid => {}
        }
    }

    pub fn settle_admission(&self, admission: &mut Admission) {
        if self.flag == SettlementFlag::AcceptanceFeePaid {
            admission.acceptance_fee_paid = true;
        }
    }

    pub fn application_ready(&self, application: &Application) -> bool {
        self.required == RequiredState::Application(application.status)
    }

    pub fn admission_ready(&self, admission: &Admission) -> bool {
        self.required == RequiredState::Admission(admission.status)
    }
}

/// One payment attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub reference: PaymentReference,
    pub gateway_reference: GatewayReference,
    pub payer_id: UserId,
    pub application_id: ApplicationId,
    pub admission_id: Option<AdmissionId>,
    pub payment_type: PaymentType,
    pub amount: Amount,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub description: String,
    pub metadata: serde_json::Value,
    pub failure: Option<FailureReason>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Payment {
    pub fn target(&self) -> PaymentTarget {
        match self.admission_id {
            Some(admission_id) if self.payment_type.rule().target == TargetKind::Admission => {
                PaymentTarget::Admission(admission_id)
            }
            _ => PaymentTarget::Application(self.application_id),
        }
    }

    pub fn mark_successful(&mut self, paid_at: DateTime<Utc>) {
        self.status = PaymentStatus::Successful;
        self.paid_at = Some(paid_at);
        self.failure = None;
        self.updated_at = paid_at;
    }

    pub fn mark_failed(&mut self, reason: FailureReason, now: DateTime<Utc>) {
        self.status = PaymentStatus::Failed;
        self.failure = Some(reason);
        self.updated_at = now;
    }
}

impl Owned for Payment {
    fn owner_id(&self) -> UserId {
        self.payer_id
    }
}

/// Generates a fresh local reference such as `ACF-3f2c...`.
pub fn generate_reference(payment_type: PaymentType) -> PaymentReference {
    PaymentReference::new(format!(
        "{}-{}",
        payment_type.reference_prefix(),
        Uuid::new_v4().simple()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table_is_indexed_by_type() {
        for payment_type in [
            PaymentType::FormPurchase,
            PaymentType::AdmissionFee,
            PaymentType::AcceptanceFee,
        ] {
            assert_eq!(payment_type.rule().payment_type, payment_type);
        }
    }

    #[test]
    fn test_rule_targets() {
        assert_eq!(
            PaymentType::FormPurchase.rule().target,
            TargetKind::Application
        );
        assert_eq!(
            PaymentType::AcceptanceFee.rule().required,
            RequiredState::Admission(AdmissionStatus::Offered)
        );
        assert_eq!(
            PaymentType::AdmissionFee.rule().required,
            RequiredState::Application(ApplicationStatus::Approved)
        );
    }

    #[test]
    fn test_generated_references_are_prefixed_and_unique() {
        let a = generate_reference(PaymentType::AcceptanceFee);
        let b = generate_reference(PaymentType::AcceptanceFee);
        assert!(a.as_str().starts_with("ACF-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Successful.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
