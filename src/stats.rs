//! # Statistics Ledger
//!
//! Counters plus the failed-transaction list, behind one mutex that is held
//! only for the duration of an update, never across I/O.
//!
//! ## Accounting
//!
//! Each fresh pass through the pipeline bumps `total_attempts` once and then
//! exactly one of `successful_saves` or `failed_saves`. A transaction that
//! later succeeds through [`retry_failed`](crate::WriteCoordinator::retry_failed)
//! moves from `failed_saves` to `successful_saves` without a new attempt, so
//! after quiescence:
//!
//! ```text
//! total_attempts == successful_saves + failed_saves
//! ```
//!
//! and a drain-and-retry cycle that recovers everything reports 100%.

use parking_lot::Mutex;
use serde::Serialize;

use crate::transaction::Transaction;

#[derive(Debug, Default)]
struct Counters {
    total_attempts: u64,
    successful_saves: u64,
    failed_saves: u64,
    retries_used: u64,
    failed: Vec<Transaction>,
}

/// Process-wide write statistics owned by one coordinator.
#[derive(Debug, Default)]
pub struct StatsLedger {
    counters: Mutex<Counters>,
}

impl StatsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.counters.lock().total_attempts += 1;
    }

    pub(crate) fn record_retry(&self) {
        self.counters.lock().retries_used += 1;
    }

    pub(crate) fn record_success(&self) {
        self.counters.lock().successful_saves += 1;
    }

    /// A previously failed transaction finally committed.
    pub(crate) fn record_recovered(&self) {
        let mut counters = self.counters.lock();
        counters.failed_saves = counters.failed_saves.saturating_sub(1);
        counters.successful_saves += 1;
    }

    /// A fresh transaction failed. `retained` goes into the failed ledger.
    pub(crate) fn record_failure(&self, retained: Option<Transaction>) {
        let mut counters = self.counters.lock();
        counters.failed_saves += 1;
        if let Some(txn) = retained {
            counters.failed.push(txn);
        }
    }

    /// A retried transaction failed again on contention; it stays counted as
    /// failed and goes back into the ledger.
    pub(crate) fn retain_failed(&self, txn: Transaction) {
        self.counters.lock().failed.push(txn);
    }

    /// Removes and returns every retained failed transaction.
    pub(crate) fn take_failed(&self) -> Vec<Transaction> {
        std::mem::take(&mut self.counters.lock().failed)
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self, queue_size: usize) -> StatsSnapshot {
        let counters = self.counters.lock();
        StatsSnapshot::new(
            counters.total_attempts,
            counters.successful_saves,
            counters.failed_saves,
            counters.retries_used,
            counters.failed.len(),
            queue_size,
        )
    }
}

/// Read-only view of the ledger returned by `stats()` and `await_drain()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_attempts: u64,
    pub successful_saves: u64,
    pub failed_saves: u64,
    pub retries_used: u64,
    /// `successful_saves / total_attempts × 100`, or `0.0` with no attempts.
    pub success_rate: f64,
    pub failed_transactions_count: usize,
    /// Enqueued transactions not yet finished by the worker.
    pub queue_size: usize,
}

impl StatsSnapshot {
    fn new(
        total_attempts: u64,
        successful_saves: u64,
        failed_saves: u64,
        retries_used: u64,
        failed_transactions_count: usize,
        queue_size: usize,
    ) -> Self {
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            successful_saves as f64 / total_attempts as f64 * 100.0
        };
        Self {
            total_attempts,
            successful_saves,
            failed_saves,
            retries_used,
            success_rate,
            failed_transactions_count,
            queue_size,
        }
    }

    /// Attempts that have neither succeeded nor failed yet.
    pub fn unresolved(&self) -> u64 {
        self.total_attempts
            .saturating_sub(self.successful_saves + self.failed_saves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Statement;

    #[test]
    fn test_empty_ledger_has_zero_rate() {
        let ledger = StatsLedger::new();
        let snap = ledger.snapshot(0);

        assert_eq!(snap.total_attempts, 0);
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.unresolved(), 0);
    }

    #[test]
    fn test_success_rate() {
        let ledger = StatsLedger::new();
        for _ in 0..4 {
            ledger.record_attempt();
        }
        ledger.record_success();
        ledger.record_success();
        ledger.record_success();
        ledger.record_failure(None);

        let snap = ledger.snapshot(2);
        assert_eq!(snap.success_rate, 75.0);
        assert_eq!(snap.queue_size, 2);
        assert_eq!(snap.unresolved(), 0);
    }

    #[test]
    fn test_failed_ledger_round_trip() {
        let ledger = StatsLedger::new();
        let txn = Transaction::single(Statement::new("INSERT INTO t VALUES (1)"));
        let id = txn.id().clone();

        ledger.record_attempt();
        ledger.record_failure(Some(txn));
        assert_eq!(ledger.snapshot(0).failed_transactions_count, 1);

        let drained = ledger.take_failed();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id(), &id);
        assert_eq!(ledger.snapshot(0).failed_transactions_count, 0);

        ledger.record_recovered();
        let snap = ledger.snapshot(0);
        assert_eq!(snap.failed_saves, 0);
        assert_eq!(snap.successful_saves, 1);
        assert_eq!(snap.success_rate, 100.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let ledger = StatsLedger::new();
        ledger.record_attempt();
        ledger.record_success();

        let json = serde_json::to_value(ledger.snapshot(0)).unwrap();
        assert_eq!(json["successful_saves"], 1);
        assert_eq!(json["success_rate"], 100.0);
    }
}
