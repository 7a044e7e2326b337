use super::index::{LedgerView, plan_commit};
use crate::domain::admission::{Admission, AdmissionStatus};
use crate::domain::application::Application;
use crate::domain::ids::{
    AdmissionId, ApplicationId, ApplicationNumber, PaymentReference, ProgramId, UserId,
};
use crate::domain::payment::{Payment, PaymentStatus, PaymentTarget, PaymentType};
use crate::domain::ports::{
    LedgerBatch, LedgerStore, Record, RecordKey, RecordKind, StoreError, StoreResult, UniqueKey,
};
use crate::domain::program::Program;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_APPLICATIONS: &str = "applications";
pub const CF_ADMISSIONS: &str = "admissions";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_PROGRAMS: &str = "programs";
/// Unique-constraint entries, `constraint|value` -> owning record key.
pub const CF_UNIQUE_INDEX: &str = "unique_index";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_APPLICATIONS,
    CF_ADMISSIONS,
    CF_PAYMENTS,
    CF_PROGRAMS,
    CF_UNIQUE_INDEX,
];

fn family_for(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Application => CF_APPLICATIONS,
        RecordKind::Admission => CF_ADMISSIONS,
        RecordKind::Payment => CF_PAYMENTS,
        RecordKind::Program => CF_PROGRAMS,
    }
}

fn index_key(key: &UniqueKey) -> Vec<u8> {
    format!("{}|{}", key.constraint, key.value).into_bytes()
}

/// A persistent ledger backed by RocksDB.
///
/// Each aggregate lives in its own column family as JSON. Commits are serialized by a
/// mutex so the version and unique-index checks see a stable view, then land in a
/// single `WriteBatch`.
///
/// `Clone` shares the underlying `Arc<DB>` and commit lock.
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a ledger at `path`, creating any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("column family '{name}' not found")))
    }

    fn get<T: DeserializeOwned>(&self, family: &str, id: &str) -> StoreResult<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> StoreResult<Vec<T>> {
        let cf = self.cf(family)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn owner_record<T: DeserializeOwned>(&self, unique: &UniqueKey) -> StoreResult<Option<T>> {
        match self.index_owner(unique)? {
            Some(owner) => self.get(family_for(owner.kind), &owner.id),
            None => Ok(None),
        }
    }

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }
}

impl LedgerView for RocksDbLedger {
    fn current(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        let family = family_for(key.kind);
        Ok(match key.kind {
            RecordKind::Application => self.get(family, &key.id)?.map(Record::Application),
            RecordKind::Admission => self.get(family, &key.id)?.map(Record::Admission),
            RecordKind::Payment => self.get(family, &key.id)?.map(Record::Payment),
            RecordKind::Program => None,
        })
    }

    fn index_owner(&self, key: &UniqueKey) -> StoreResult<Option<RecordKey>> {
        let cf = self.cf(CF_UNIQUE_INDEX)?;
        match self.db.get_cf(cf, index_key(key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedger {
    async fn application(&self, id: ApplicationId) -> StoreResult<Option<Application>> {
        self.get(CF_APPLICATIONS, &id.to_string())
    }

    async fn application_by_number(
        &self,
        number: &ApplicationNumber,
    ) -> StoreResult<Option<Application>> {
        self.owner_record(&UniqueKey::application_number(number))
    }

    async fn next_application_sequence(&self, session: &str) -> StoreResult<u64> {
        let max = self
            .scan::<Application>(CF_APPLICATIONS)?
            .into_iter()
            .filter(|a| a.session == session)
            .map(|a| a.sequence)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn admission(&self, id: AdmissionId) -> StoreResult<Option<Admission>> {
        self.get(CF_ADMISSIONS, &id.to_string())
    }

    async fn admissions_for_application(&self, id: ApplicationId) -> StoreResult<Vec<Admission>> {
        Ok(self
            .scan::<Admission>(CF_ADMISSIONS)?
            .into_iter()
            .filter(|a| a.application_id == id)
            .collect())
    }

    async fn admissions_with_status(&self, status: AdmissionStatus) -> StoreResult<Vec<Admission>> {
        Ok(self
            .scan::<Admission>(CF_ADMISSIONS)?
            .into_iter()
            .filter(|a| a.status == status)
            .collect())
    }

    async fn payment(&self, reference: &PaymentReference) -> StoreResult<Option<Payment>> {
        self.get(CF_PAYMENTS, reference.as_str())
    }

    async fn successful_payment(
        &self,
        payer: UserId,
        target: PaymentTarget,
        payment_type: PaymentType,
    ) -> StoreResult<Option<Payment>> {
        self.owner_record(&UniqueKey::successful_payment(payer, target, payment_type))
    }

    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.status == status)
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn program(&self, id: ProgramId) -> StoreResult<Option<Program>> {
        self.get(CF_PROGRAMS, &id.to_string())
    }

    async fn put_program(&self, program: Program) -> StoreResult<()> {
        let cf = self.cf(CF_PROGRAMS)?;
        self.db
            .put_cf(cf, program.id.to_string().as_bytes(), Self::encode(&program)?)?;
        Ok(())
    }

    async fn commit(&self, batch: LedgerBatch) -> StoreResult<()> {
        let _guard = self.commit_lock.lock().await;
        let plan = plan_commit(self, batch)?;

        let mut write = WriteBatch::default();
        let index_cf = self.cf(CF_UNIQUE_INDEX)?;
        for (unique, owner) in &plan.index {
            match owner {
                Some(owner) => write.put_cf(index_cf, index_key(unique), Self::encode(owner)?),
                None => write.delete_cf(index_cf, index_key(unique)),
            }
        }
        for record in &plan.records {
            let key = record.key();
            let cf = self.cf(family_for(key.kind))?;
            let value = match record {
                Record::Application(a) => Self::encode(a)?,
                Record::Admission(a) => Self::encode(a)?,
                Record::Payment(p) => Self::encode(p)?,
            };
            write.put_cf(cf, key.id.as_bytes(), value);
        }

        self.db.write(write)?;
        Ok(())
    }
}
