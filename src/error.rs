use crate::application::authorization::Action;
use crate::domain::ids::{AdmissionId, ApplicationId, PaymentReference, UserId};
use crate::domain::payment::PaymentType;
use crate::domain::ports::{RecordKind, StoreError};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// A single problem found while validating an offer import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportIssue {
    /// 1-based data row in the upload, header excluded.
    pub row: usize,
    pub application_number: String,
    pub issue: String,
}

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("actor {actor} is not allowed to {action}")]
    Unauthorized { actor: UserId, action: Action },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: RecordKind, id: String },
    #[error("state conflict: {0}")]
    StateConflict(String),
    #[error("application is missing required fields: {}", .0.join(", "))]
    IncompleteApplication(Vec<&'static str>),
    #[error("invalid state for {payment_type} payment: {reason}")]
    InvalidState {
        payment_type: PaymentType,
        reason: String,
    },
    #[error("admission offer {0} has expired")]
    OfferExpired(AdmissionId),
    #[error("application {0} already has an active admission offer")]
    DuplicateOffer(ApplicationId),
    #[error("{0} has already been paid")]
    AlreadySatisfied(PaymentType),
    #[error(
        "payment {reference}: expected {expected_amount} {expected_currency}, gateway reported {reported_amount} {reported_currency}"
    )]
    AmountMismatch {
        reference: PaymentReference,
        expected_amount: Decimal,
        expected_currency: String,
        reported_amount: Decimal,
        reported_currency: String,
    },
    #[error("payment {0} failed")]
    PaymentFailed(PaymentReference),
    #[error("payment {0} is still being processed by the gateway")]
    PaymentPending(PaymentReference),
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("offer import rejected with {} issue(s)", .0.len())]
    ImportRejected(Vec<ImportIssue>),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AdmissionError {
    pub fn not_found(kind: RecordKind, id: impl ToString) -> Self {
        AdmissionError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// HTTP status a boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::Unauthorized { .. } => 403,
            AdmissionError::NotFound { .. } => 404,
            AdmissionError::StateConflict(_)
            | AdmissionError::IncompleteApplication(_)
            | AdmissionError::InvalidState { .. }
            | AdmissionError::OfferExpired(_)
            | AdmissionError::DuplicateOffer(_)
            | AdmissionError::AlreadySatisfied(_)
            | AdmissionError::AmountMismatch { .. }
            | AdmissionError::PaymentFailed(_)
            | AdmissionError::ImportRejected(_)
            | AdmissionError::ValidationError(_) => 422,
            AdmissionError::PaymentPending(_) => 202,
            AdmissionError::GatewayUnavailable(_) => 502,
            AdmissionError::Storage(StoreError::StaleWrite(_)) => 409,
            AdmissionError::Storage(_) => 503,
            AdmissionError::CsvError(_) => 400,
            AdmissionError::IoError(_) => 500,
        }
    }

    /// Transient failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::GatewayUnavailable(_)
                | AdmissionError::PaymentPending(_)
                | AdmissionError::Storage(StoreError::StaleWrite(_))
                | AdmissionError::Storage(StoreError::Backend(_))
        )
    }
}
