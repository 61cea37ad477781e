//! # Fault Injection
//!
//! Real lock contention is timing-dependent and hard to reproduce on demand.
//! The retry pipeline therefore consults a [`FaultInjector`] on every attempt,
//! right after `BEGIN IMMEDIATE` succeeds and before any statement runs. An
//! injected error takes exactly the same path as a real one: the transaction
//! is rolled back, classified, and retried or failed.
//!
//! Production coordinators use [`NoFaults`]. Tests and the stress binary use
//! [`RandomContention`] and [`FailFirstAttempts`].

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rusqlite::ffi;

use crate::error::ContentionKind;
use crate::transaction::Transaction;

/// Hook consulted once per execution attempt.
pub trait FaultInjector: Send + Sync {
    /// Returns an error to abort this attempt with, or `None` to proceed.
    ///
    /// `attempt` is the 0-based attempt index within the current pass
    /// through the pipeline.
    fn before_statements(&self, txn: &Transaction, attempt: u32) -> Option<rusqlite::Error>;
}

/// Builds the rusqlite error SQLite itself would raise for `kind`.
pub fn contention_error(kind: ContentionKind) -> rusqlite::Error {
    let (code, message) = match kind {
        ContentionKind::Busy => (ffi::SQLITE_BUSY, "database is busy"),
        ContentionKind::Locked => (ffi::SQLITE_LOCKED, "database is locked"),
        ContentionKind::ReadOnly => (ffi::SQLITE_READONLY, "attempt to write a readonly database"),
    };
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some(message.to_string()))
}

// =============================================================================
// Implementations
// =============================================================================

/// Never injects anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn before_statements(&self, _txn: &Transaction, _attempt: u32) -> Option<rusqlite::Error> {
        None
    }
}

/// Injects `kind` on each attempt independently with probability `probability`.
#[derive(Debug)]
pub struct RandomContention {
    probability: f64,
    kind: ContentionKind,
    injected: AtomicU64,
}

impl RandomContention {
    /// `probability` is clamped to `[0, 1]`.
    pub fn new(probability: f64, kind: ContentionKind) -> Self {
        let probability = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        Self {
            probability,
            kind,
            injected: AtomicU64::new(0),
        }
    }

    /// Number of errors injected so far.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }
}

impl FaultInjector for RandomContention {
    fn before_statements(&self, _txn: &Transaction, _attempt: u32) -> Option<rusqlite::Error> {
        if rand::thread_rng().gen_bool(self.probability) {
            self.injected.fetch_add(1, Ordering::Relaxed);
            Some(contention_error(self.kind))
        } else {
            None
        }
    }
}

/// Fails the first `failures` attempts of every pass, then lets it through.
///
/// With `failures >= max_retries` the transaction can never succeed, which is
/// how the bounded-retry behaviour is exercised.
#[derive(Debug)]
pub struct FailFirstAttempts {
    failures: u32,
    kind: ContentionKind,
    calls: AtomicU64,
}

impl FailFirstAttempts {
    pub fn new(failures: u32, kind: ContentionKind) -> Self {
        Self {
            failures,
            kind,
            calls: AtomicU64::new(0),
        }
    }

    /// Fails every attempt.
    pub fn always(kind: ContentionKind) -> Self {
        Self::new(u32::MAX, kind)
    }

    /// Number of attempts that reached the injector.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl FaultInjector for FailFirstAttempts {
    fn before_statements(&self, _txn: &Transaction, attempt: u32) -> Option<rusqlite::Error> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (attempt < self.failures).then(|| contention_error(self.kind))
    }
}
