//! # Retry Pipeline
//!
//! The one code path every write goes through, whether it came from
//! `execute` on a producer thread, from the background worker, or from a
//! `retry_failed` pass.
//!
//! ## Per-Attempt Steps
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. acquire connection (pool, or overflow after acquire_timeout)     │
//! │ 2. BEGIN IMMEDIATE        ← lock contention surfaces here           │
//! │ 3. fault injector hook                                              │
//! │ 4. execute each statement in order                                  │
//! │ 5. COMMIT                                                           │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │ ok                  │ contention              │ anything else
//!        ▼                     ▼                         ▼
//!    Committed      rollback, checkpoint(PASSIVE),    rollback,
//!                   sleep backoff, next attempt       Failed (no retry)
//!                   ... or Failed + failed ledger
//!                       after max_retries attempts
//! ```
//!
//! `BEGIN IMMEDIATE` takes the write lock up front. With a deferred `BEGIN`
//! the lock is only requested at the first write, and a busy error there can
//! leave earlier reads of the same transaction looking at a stale snapshot.
//!
//! Rollback needs no explicit code: dropping an uncommitted
//! `rusqlite::Transaction` rolls it back.

use std::sync::Arc;
use std::thread;

use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::connection::checkpoint_passive;
use crate::error::{ContentionKind, Error, Result};
use crate::fault::FaultInjector;
use crate::pool::ConnectionPool;
use crate::stats::StatsLedger;
use crate::transaction::{Transaction, TransactionStatus};

/// Whether a run is a transaction's first pass or a `retry_failed` pass.
///
/// Only fresh runs count toward `total_attempts` and `failed_saves`; a retry
/// pass settles an outcome that was already counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunKind {
    Fresh,
    Retry,
}

/// How a run ended.
enum Outcome {
    Committed,
    Exhausted(ContentionKind),
    Fatal(Error),
}

/// Shared execution state: pool, ledger, and retry policy.
pub(crate) struct Pipeline {
    pub(crate) pool: ConnectionPool,
    pub(crate) ledger: StatsLedger,
    max_retries: u32,
    backoff: BackoffPolicy,
    checkpoint_on_contention: bool,
    faults: Arc<dyn FaultInjector>,
}

impl Pipeline {
    pub(crate) fn new(
        pool: ConnectionPool,
        max_retries: u32,
        backoff: BackoffPolicy,
        checkpoint_on_contention: bool,
        faults: Arc<dyn FaultInjector>,
    ) -> Self {
        Self {
            pool,
            ledger: StatsLedger::new(),
            max_retries,
            backoff,
            checkpoint_on_contention,
            faults,
        }
    }

    /// Runs `txn` to completion. Returns true if it committed.
    ///
    /// Never returns an error: contention is retried, everything else is
    /// recorded as a failure.
    pub(crate) fn run(&self, txn: &mut Transaction, kind: RunKind) -> bool {
        if kind == RunKind::Fresh {
            self.ledger.record_attempt();
        }
        txn.set_status(TransactionStatus::InFlight);

        match self.run_attempts(txn) {
            Outcome::Committed => {
                txn.set_status(TransactionStatus::Committed);
                match kind {
                    RunKind::Fresh => self.ledger.record_success(),
                    RunKind::Retry => self.ledger.record_recovered(),
                }
                true
            }
            Outcome::Exhausted(contention) => {
                warn!(
                    txn_id = %txn.id(),
                    attempts = self.max_retries,
                    kind = %contention,
                    "retries exhausted, keeping transaction for a later retry pass"
                );
                txn.set_status(TransactionStatus::Failed);
                match kind {
                    RunKind::Fresh => self.ledger.record_failure(Some(txn.clone())),
                    RunKind::Retry => self.ledger.retain_failed(txn.clone()),
                }
                false
            }
            Outcome::Fatal(err) => {
                warn!(txn_id = %txn.id(), error = %err, "transaction failed, not retrying");
                txn.set_status(TransactionStatus::Failed);
                match kind {
                    RunKind::Fresh => self.ledger.record_failure(None),
                    RunKind::Retry => self.ledger.retain_failed(txn.clone()),
                }
                false
            }
        }
    }

    fn run_attempts(&self, txn: &mut Transaction) -> Outcome {
        let mut attempt = 0;
        loop {
            txn.record_attempt();
            let err = match self.attempt(txn, attempt) {
                Ok(()) => return Outcome::Committed,
                Err(err) => err,
            };

            let Some(contention) = err.contention_kind() else {
                return Outcome::Fatal(err);
            };
            attempt += 1;
            if attempt >= self.max_retries {
                return Outcome::Exhausted(contention);
            }

            self.ledger.record_retry();
            let delay = self.backoff.delay(attempt - 1, contention);
            debug!(
                txn_id = %txn.id(),
                attempt,
                kind = %contention,
                delay_ms = delay.as_millis() as u64,
                "contention, backing off"
            );
            thread::sleep(delay);
        }
    }

    fn attempt(&self, txn: &Transaction, attempt: u32) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let result = self.execute_atomically(&mut conn, txn, attempt);

        if self.checkpoint_on_contention {
            if let Err(err) = &result {
                if err.is_contention() {
                    if let Err(checkpoint_err) = checkpoint_passive(&conn) {
                        debug!(error = %checkpoint_err, "passive checkpoint skipped");
                    }
                }
            }
        }

        result
    }

    fn execute_atomically(&self, conn: &mut Connection, txn: &Transaction, attempt: u32) -> Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(injected) = self.faults.before_statements(txn, attempt) {
            return Err(injected.into());
        }

        for statement in txn.statements() {
            tx.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
        }

        tx.commit()?;
        Ok(())
    }
}
