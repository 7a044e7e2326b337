use super::actor::Owned;
use super::ids::{AdmissionId, ApplicationId, ApplicationNumber, ProgramId, UserId};
use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Offered,
    Accepted,
    Declined,
    Expired,
}

impl AdmissionStatus {
    pub fn can_transition_to(self, next: AdmissionStatus) -> bool {
        use AdmissionStatus::*;
        matches!(
            (self, next),
            (Offered, Accepted) | (Offered, Declined) | (Offered, Expired)
        )
    }

    /// Every status except `Expired` counts towards the one-offer-per-application rule.
    pub fn is_active(self) -> bool {
        self != AdmissionStatus::Expired
    }

    pub fn label(self) -> &'static str {
        match self {
            AdmissionStatus::Offered => "offered",
            AdmissionStatus::Accepted => "accepted",
            AdmissionStatus::Declined => "declined",
            AdmissionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An admission offer made against an approved application.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Admission {
    pub id: AdmissionId,
    pub application_id: ApplicationId,
    pub applicant_id: UserId,
    pub program_id: ProgramId,
    pub status: AdmissionStatus,
    pub acceptance_fee_amount: Amount,
    pub currency: Currency,
    pub offer_date: DateTime<Utc>,
    pub acceptance_deadline: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub acceptance_fee_paid: bool,
    pub admission_rejected: bool,
    pub rejection_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Admission {
    /// Past the deadline means strictly after it; accepting at the deadline is allowed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.acceptance_deadline
    }
}

impl Owned for Admission {
    fn owner_id(&self) -> UserId {
        self.applicant_id
    }
}

/// One row of a bulk offer upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferImportRow {
    pub application_number: ApplicationNumber,
    /// Falls back to the configured acceptance window when absent.
    pub acceptance_deadline: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transition_table() {
        use AdmissionStatus::*;
        assert!(Offered.can_transition_to(Accepted));
        assert!(Offered.can_transition_to(Declined));
        assert!(Offered.can_transition_to(Expired));
        assert!(!Accepted.can_transition_to(Declined));
        assert!(!Expired.can_transition_to(Accepted));
        assert!(!Declined.can_transition_to(Offered));
    }

    #[test]
    fn test_overdue_boundary() {
        let now = Utc::now();
        let admission = Admission {
            id: AdmissionId::new(),
            application_id: ApplicationId::new(),
            applicant_id: UserId::new(),
            program_id: ProgramId::new(),
            status: AdmissionStatus::Offered,
            acceptance_fee_amount: Amount::new(dec!(50000)).unwrap(),
            currency: Currency::new("NGN").unwrap(),
            offer_date: now - Duration::days(14),
            acceptance_deadline: now,
            accepted_at: None,
            acceptance_fee_paid: false,
            admission_rejected: false,
            rejection_date: None,
            version: 0,
        };

        assert!(!admission.is_overdue(now));
        assert!(admission.is_overdue(now + Duration::seconds(1)));
    }

    #[test]
    fn test_only_expired_is_inactive() {
        assert!(AdmissionStatus::Offered.is_active());
        assert!(AdmissionStatus::Declined.is_active());
        assert!(!AdmissionStatus::Expired.is_active());
    }
}
