use super::actor::{ActorKind, PermissionSet};
use super::admission::{Admission, AdmissionStatus};
use super::application::Application;
use super::ids::{
    AdmissionId, ApplicationId, ApplicationNumber, GatewayReference, PaymentReference, ProgramId,
    UserId,
};
use super::money::{Amount, Currency};
use super::payment::{Payment, PaymentStatus, PaymentTarget, PaymentType};
use super::program::Program;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type SharedLedger = Arc<dyn LedgerStore>;
pub type SharedGateway = Arc<dyn PaymentGateway>;
pub type SharedClock = Arc<dyn Clock>;
pub type SharedPermissionResolver = Arc<dyn PermissionResolver>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for applications, admissions and payments.
///
/// Reads are plain lookups. All writes go through [`LedgerStore::commit`], which applies
/// a [`LedgerBatch`] atomically: either every record is written and every unique index is
/// updated, or nothing changes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn application(&self, id: ApplicationId) -> StoreResult<Option<Application>>;
    async fn application_by_number(
        &self,
        number: &ApplicationNumber,
    ) -> StoreResult<Option<Application>>;
    /// One past the highest sequence used in `session`. Not a reservation: the
    /// application-number index decides which concurrent writer wins.
    async fn next_application_sequence(&self, session: &str) -> StoreResult<u64>;

    async fn admission(&self, id: AdmissionId) -> StoreResult<Option<Admission>>;
    async fn admissions_for_application(&self, id: ApplicationId) -> StoreResult<Vec<Admission>>;
    async fn admissions_with_status(&self, status: AdmissionStatus) -> StoreResult<Vec<Admission>>;

    async fn payment(&self, reference: &PaymentReference) -> StoreResult<Option<Payment>>;
    async fn successful_payment(
        &self,
        payer: UserId,
        target: PaymentTarget,
        payment_type: PaymentType,
    ) -> StoreResult<Option<Payment>>;
    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>>;

    async fn program(&self, id: ProgramId) -> StoreResult<Option<Program>>;
    async fn put_program(&self, program: Program) -> StoreResult<()>;

    async fn commit(&self, batch: LedgerBatch) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Application,
    Admission,
    Payment,
    /// Catalog rows; never part of a batch.
    Program,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Application => "application",
            RecordKind::Admission => "admission",
            RecordKind::Payment => "payment",
            RecordKind::Program => "program",
        })
    }
}

/// Primary key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Unique constraints enforced by every ledger backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// A new record reused an existing primary key (e.g. a payment reference).
    RecordKey(RecordKind),
    ApplicationNumber,
    /// One application per applicant and session.
    ApplicantSession,
    GatewayReference,
    /// One `successful` payment per (payer, target, type).
    SuccessfulPayment,
    /// One non-expired admission per application.
    ActiveAdmission,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::RecordKey(kind) => write!(f, "{kind}_key"),
            Constraint::ApplicationNumber => f.write_str("application_number"),
            Constraint::ApplicantSession => f.write_str("applicant_session"),
            Constraint::GatewayReference => f.write_str("gateway_reference"),
            Constraint::SuccessfulPayment => f.write_str("successful_payment"),
            Constraint::ActiveAdmission => f.write_str("active_admission"),
        }
    }
}

/// A value that must be unique within its constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueKey {
    pub constraint: Constraint,
    pub value: String,
}

impl UniqueKey {
    fn new(constraint: Constraint, value: impl Into<String>) -> Self {
        Self {
            constraint,
            value: value.into(),
        }
    }

    pub fn successful_payment(
        payer: UserId,
        target: PaymentTarget,
        payment_type: PaymentType,
    ) -> Self {
        Self::new(
            Constraint::SuccessfulPayment,
            format!("{payer}|{target}|{payment_type}"),
        )
    }

    pub fn application_number(number: &ApplicationNumber) -> Self {
        Self::new(Constraint::ApplicationNumber, number.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    Application(Application),
    Admission(Admission),
    Payment(Payment),
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Record::Application(a) => RecordKey {
                kind: RecordKind::Application,
                id: a.id.to_string(),
            },
            Record::Admission(a) => RecordKey {
                kind: RecordKind::Admission,
                id: a.id.to_string(),
            },
            Record::Payment(p) => RecordKey {
                kind: RecordKind::Payment,
                id: p.reference.to_string(),
            },
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Record::Application(a) => a.version,
            Record::Admission(a) => a.version,
            Record::Payment(p) => p.version,
        }
    }

    pub fn set_version(&mut self, version: u64) {
        match self {
            Record::Application(a) => a.version = version,
            Record::Admission(a) => a.version = version,
            Record::Payment(p) => p.version = version,
        }
    }

    /// Index entries this record occupies in its current state.
    pub fn unique_keys(&self) -> Vec<UniqueKey> {
        match self {
            Record::Application(a) => vec![
                UniqueKey::application_number(&a.number),
                UniqueKey::new(
                    Constraint::ApplicantSession,
                    format!("{}|{}", a.applicant_id, a.session),
                ),
            ],
            Record::Admission(a) if a.status.is_active() => vec![UniqueKey::new(
                Constraint::ActiveAdmission,
                a.application_id.to_string(),
            )],
            Record::Admission(_) => Vec::new(),
            Record::Payment(p) => {
                let mut keys = vec![UniqueKey::new(
                    Constraint::GatewayReference,
                    p.gateway_reference.as_str(),
                )];
                if p.status == PaymentStatus::Successful {
                    keys.push(UniqueKey::successful_payment(
                        p.payer_id,
                        p.target(),
                        p.payment_type,
                    ));
                }
                keys
            }
        }
    }
}

/// A set of record writes committed atomically.
///
/// Each record carries the version it was read at (0 for a new record). The commit
/// fails with [`StoreError::StaleWrite`] if any stored version moved on in the meantime,
/// and stored versions are bumped by one on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerBatch {
    records: Vec<Record>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_application(mut self, application: Application) -> Self {
        self.records.push(Record::Application(application));
        self
    }

    pub fn put_admission(mut self, admission: Admission) -> Self {
        self.records.push(Record::Admission(admission));
        self
    }

    pub fn put_payment(mut self, payment: Payment) -> Self {
        self.records.push(Record::Payment(payment));
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint '{0}' violated")]
    UniqueViolation(Constraint),
    #[error("stale write to {0}")]
    StaleWrite(RecordKey),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Outbound charge request sent to the payment gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRequest {
    pub reference: PaymentReference,
    pub amount: Amount,
    pub currency: Currency,
    pub email: String,
    pub metadata: serde_json::Value,
}

/// What the gateway hands back for a freshly initialized charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeSession {
    pub gateway_reference: GatewayReference,
    pub authorization_url: String,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Failed,
    /// The gateway has no record of the reference.
    Unknown,
    /// The charge exists but the payer has not finished yet.
    Processing,
}

/// Authoritative charge state as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    pub amount: Decimal,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    #[error("gateway is not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: ChargeRequest) -> std::result::Result<ChargeSession, GatewayError>;
    async fn verify(
        &self,
        reference: &GatewayReference,
    ) -> std::result::Result<ChargeVerification, GatewayError>;
}

/// Resolves the permission names granted to an actor. Backed by the role subsystem.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve_permissions(&self, actor_id: UserId, kind: ActorKind) -> Result<PermissionSet>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
