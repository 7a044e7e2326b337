//! Application layer containing the admissions business logic.
//!
//! `LifecycleEngine` owns the application and admission state machines,
//! `ReconciliationEngine` owns payments, and both ask the authorization gate before
//! touching anything. Neither engine keeps state between calls: every operation reads
//! from the ledger, decides, and commits a single atomic batch.

/// Re-runs an optimistic read-modify-write while the ledger reports a stale write.
macro_rules! retry_stale {
    ($attempts:expr, $op:expr) => {{
        let attempts: u32 = $attempts;
        let mut attempt: u32 = 1;
        loop {
            match $op.await {
                Err($crate::error::AdmissionError::Storage(
                    $crate::domain::ports::StoreError::StaleWrite(key),
                )) if attempt < attempts => {
                    tracing::debug!(%key, attempt, "stale write, retrying");
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

pub mod authorization;
pub mod lifecycle;
pub mod reconciliation;
