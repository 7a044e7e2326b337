use super::index::{LedgerView, plan_commit};
use crate::domain::actor::{ActorKind, PermissionSet};
use crate::domain::admission::{Admission, AdmissionStatus};
use crate::domain::application::Application;
use crate::domain::ids::{
    AdmissionId, ApplicationId, ApplicationNumber, PaymentReference, ProgramId, UserId,
};
use crate::domain::payment::{Payment, PaymentStatus, PaymentTarget, PaymentType};
use crate::domain::ports::{
    LedgerBatch, LedgerStore, PermissionResolver, Record, RecordKey, RecordKind, StoreResult,
    UniqueKey,
};
use crate::domain::program::Program;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    records: HashMap<RecordKey, Record>,
    index: HashMap<UniqueKey, RecordKey>,
    programs: HashMap<ProgramId, Program>,
}

impl LedgerView for Tables {
    fn current(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        Ok(self.records.get(key).cloned())
    }

    fn index_owner(&self, key: &UniqueKey) -> StoreResult<Option<RecordKey>> {
        Ok(self.index.get(key).cloned())
    }
}

impl Tables {
    fn application(&self, key: &RecordKey) -> Option<Application> {
        match self.records.get(key) {
            Some(Record::Application(a)) => Some(a.clone()),
            _ => None,
        }
    }

    fn admissions(&self) -> impl Iterator<Item = &Admission> {
        self.records.values().filter_map(|r| match r {
            Record::Admission(a) => Some(a),
            _ => None,
        })
    }

    fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.records.values().filter_map(|r| match r {
            Record::Payment(p) => Some(p),
            _ => None,
        })
    }
}

fn key(kind: RecordKind, id: impl ToString) -> RecordKey {
    RecordKey {
        kind,
        id: id.to_string(),
    }
}

/// A thread-safe in-memory ledger.
///
/// One `RwLock` guards records and indexes together, so a commit is atomic with respect
/// to every reader and every other commit. Clones share the same tables.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn application(&self, id: ApplicationId) -> StoreResult<Option<Application>> {
        let tables = self.tables.read().await;
        Ok(tables.application(&key(RecordKind::Application, id)))
    }

    async fn application_by_number(
        &self,
        number: &ApplicationNumber,
    ) -> StoreResult<Option<Application>> {
        let tables = self.tables.read().await;
        Ok(tables
            .index
            .get(&UniqueKey::application_number(number))
            .and_then(|owner| tables.application(owner)))
    }

    async fn next_application_sequence(&self, session: &str) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let max = tables
            .records
            .values()
            .filter_map(|r| match r {
                Record::Application(a) if a.session == session => Some(a.sequence),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn admission(&self, id: AdmissionId) -> StoreResult<Option<Admission>> {
        let tables = self.tables.read().await;
        match tables.records.get(&key(RecordKind::Admission, id)) {
            Some(Record::Admission(a)) => Ok(Some(a.clone())),
            _ => Ok(None),
        }
    }

    async fn admissions_for_application(&self, id: ApplicationId) -> StoreResult<Vec<Admission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .admissions()
            .filter(|a| a.application_id == id)
            .cloned()
            .collect())
    }

    async fn admissions_with_status(&self, status: AdmissionStatus) -> StoreResult<Vec<Admission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .admissions()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn payment(&self, reference: &PaymentReference) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        match tables.records.get(&key(RecordKind::Payment, reference)) {
            Some(Record::Payment(p)) => Ok(Some(p.clone())),
            _ => Ok(None),
        }
    }

    async fn successful_payment(
        &self,
        payer: UserId,
        target: PaymentTarget,
        payment_type: PaymentType,
    ) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        let unique = UniqueKey::successful_payment(payer, target, payment_type);
        Ok(tables
            .index
            .get(&unique)
            .and_then(|owner| match tables.records.get(owner) {
                Some(Record::Payment(p)) => Some(p.clone()),
                _ => None,
            }))
    }

    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn program(&self, id: ProgramId) -> StoreResult<Option<Program>> {
        let tables = self.tables.read().await;
        Ok(tables.programs.get(&id).cloned())
    }

    async fn put_program(&self, program: Program) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.programs.insert(program.id, program);
        Ok(())
    }

    async fn commit(&self, batch: LedgerBatch) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let plan = plan_commit(&*tables, batch)?;

        for (unique, owner) in plan.index {
            match owner {
                Some(owner) => tables.index.insert(unique, owner),
                None => tables.index.remove(&unique),
            };
        }
        for record in plan.records {
            tables.records.insert(record.key(), record);
        }
        Ok(())
    }
}

/// Permission grants held in memory, standing in for the role subsystem.
#[derive(Default, Clone)]
pub struct InMemoryPermissionResolver {
    grants: Arc<RwLock<HashMap<UserId, PermissionSet>>>,
}

impl InMemoryPermissionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, user: UserId, permissions: PermissionSet) {
        self.grants.write().await.insert(user, permissions);
    }
}

#[async_trait]
impl PermissionResolver for InMemoryPermissionResolver {
    async fn resolve_permissions(&self, actor_id: UserId, kind: ActorKind) -> Result<PermissionSet> {
        if kind == ActorKind::Applicant {
            return Ok(PermissionSet::empty());
        }
        Ok(self
            .grants
            .read()
            .await
            .get(&actor_id)
            .cloned()
            .unwrap_or_default())
    }
}
