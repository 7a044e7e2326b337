//! Unique-index bookkeeping shared by every ledger backend.
//!
//! A backend exposes its current state through [`LedgerView`]; [`plan_commit`] checks a
//! batch against it (version compare-and-swap plus every unique constraint) and returns
//! the exact records and index entries to write. Backends apply the plan atomically.

use crate::domain::ports::{
    Constraint, LedgerBatch, Record, RecordKey, StoreError, StoreResult, UniqueKey,
};
use std::collections::BTreeMap;

pub(crate) trait LedgerView {
    fn current(&self, key: &RecordKey) -> StoreResult<Option<Record>>;
    fn index_owner(&self, key: &UniqueKey) -> StoreResult<Option<RecordKey>>;
}

#[derive(Debug, Default)]
pub(crate) struct CommitPlan {
    /// Records with their new, bumped versions.
    pub records: Vec<Record>,
    /// `Some` claims the key for a record, `None` releases it.
    pub index: Vec<(UniqueKey, Option<RecordKey>)>,
}

struct Staging<'a, V: LedgerView> {
    view: &'a V,
    records: BTreeMap<RecordKey, Record>,
    index: BTreeMap<UniqueKey, Option<RecordKey>>,
}

impl<V: LedgerView> Staging<'_, V> {
    fn current(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        match self.records.get(key) {
            Some(record) => Ok(Some(record.clone())),
            None => self.view.current(key),
        }
    }

    fn owner(&self, key: &UniqueKey) -> StoreResult<Option<RecordKey>> {
        match self.index.get(key) {
            Some(owner) => Ok(owner.clone()),
            None => self.view.index_owner(key),
        }
    }
}

pub(crate) fn plan_commit<V: LedgerView>(view: &V, batch: LedgerBatch) -> StoreResult<CommitPlan> {
    let mut staging = Staging {
        view,
        records: BTreeMap::new(),
        index: BTreeMap::new(),
    };

    for mut record in batch.into_records() {
        let key = record.key();
        let previous = staging.current(&key)?;

        match &previous {
            None if record.version() != 0 => return Err(StoreError::StaleWrite(key)),
            Some(_) if record.version() == 0 => {
                return Err(StoreError::UniqueViolation(Constraint::RecordKey(key.kind)));
            }
            Some(prev) if prev.version() != record.version() => {
                return Err(StoreError::StaleWrite(key));
            }
            _ => {}
        }

        if let Some(prev) = &previous {
            for old in prev.unique_keys() {
                if staging.owner(&old)?.as_ref() == Some(&key) {
                    staging.index.insert(old, None);
                }
            }
        }

        for unique in record.unique_keys() {
            match staging.owner(&unique)? {
                Some(owner) if owner != key => {
                    return Err(StoreError::UniqueViolation(unique.constraint));
                }
                _ => {
                    staging.index.insert(unique, Some(key.clone()));
                }
            }
        }

        record.set_version(record.version() + 1);
        staging.records.insert(key, record);
    }

    Ok(CommitPlan {
        records: staging.records.into_values().collect(),
        index: staging.index.into_iter().collect(),
    })
}
