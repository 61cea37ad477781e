//! # crawlstore - Resilient SQLite Write Coordination
//!
//! crawlstore sits between many concurrent producers (crawler workers,
//! scrapers, batch jobs) and a single SQLite file. It provides:
//!
//! - **Contention handling**: lock errors are retried with capped exponential
//!   backoff and jitter instead of surfacing to the producer
//! - **Two write paths**: synchronous `execute`, or fire-and-forget `enqueue`
//!   drained in FIFO order by a background writer
//! - **Atomic batches**: a group of statements commits together or not at all
//! - **No silent loss**: transactions that exhaust their retries are kept in a
//!   failed ledger and re-run by `retry_failed` / `await_drain`
//! - **Statistics**: attempts, successes, failures, retries, success rate
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │           Producers (threads, or Tokio tasks via api)           │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │ execute / execute_batch         │ enqueue / enqueue_batch
//!                 │                                 ▼
//!                 │                      ┌─────────────────────┐
//!                 │                      │ bounded FIFO queue  │
//!                 │                      └──────────┬──────────┘
//!                 │                                 ▼
//!                 │                      ┌─────────────────────┐
//!                 │                      │   writer thread     │
//!                 │                      └──────────┬──────────┘
//!                 ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Retry Pipeline                           │
//! │   BEGIN IMMEDIATE → statements → COMMIT, backoff on contention  │
//! │                                                                 │
//! │  ┌──────────────────┐  ┌────────────────┐  ┌─────────────────┐ │
//! │  │ Connection Pool  │  │ Stats Ledger   │  │ Failed Ledger   │ │
//! │  │ (+ overflow)     │  │ (counters)     │  │ (for retry)     │ │
//! │  └──────────────────┘  └────────────────┘  └─────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     SQLite (WAL mode)                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Atomicity**: a transaction's statements all commit or none do
//! 2. **Bounded retry**: a transaction is attempted at most `max_retries`
//!    times per pass, then lands in the failed ledger
//! 3. **FIFO**: queued transactions commit in submission order
//! 4. **Pool bound**: at most `max_connections` pooled connections exist;
//!    overflow connections are closed after one use
//! 5. **Stats consistency**: after a drain,
//!    `total_attempts == successful_saves + failed_saves`
//!
//! ## Module Organization
//!
//! - [`error`]: error type and contention classification
//! - [`config`]: coordinator configuration and defaults
//! - [`backoff`]: retry delay curve
//! - [`connection`]: connection opening and pragmas
//! - [`pool`]: bounded connection pool
//! - [`transaction`]: statements, transactions, ids
//! - [`fault`]: fault injection hooks for tests and stress runs
//! - [`stats`]: statistics ledger
//! - [`coordinator`]: the synchronous coordinator (main entry point)
//! - [`api`]: async facade over the coordinator

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types and contention classification.
pub mod error;

/// Coordinator configuration, defaults, and environment overrides.
pub mod config;

/// Capped exponential backoff with jitter.
pub mod backoff;

/// Opening connections and applying pragmas.
pub mod connection;

/// Bounded connection pool with overflow fallback.
pub mod pool;

/// Statements, transactions, and transaction ids.
pub mod transaction;

/// Fault injection.
///
/// Lets tests and the stress binary raise contention errors on demand,
/// through the same code path real lock errors take.
pub mod fault;

/// Write statistics and the failed-transaction ledger.
pub mod stats;

/// The write coordinator.
///
/// The main entry point is [`WriteCoordinator`](coordinator::WriteCoordinator).
pub mod coordinator;

/// Async API over the coordinator, for Tokio applications.
pub mod api;

mod pipeline;
mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::AsyncWriteCoordinator;
pub use backoff::BackoffPolicy;
pub use config::{CoordinatorConfig, PragmaConfig, Synchronous};
pub use coordinator::WriteCoordinator;
pub use error::{ContentionKind, Error, Result};
pub use fault::{FailFirstAttempts, FaultInjector, NoFaults, RandomContention};
pub use pool::PoolStatus;
pub use stats::StatsSnapshot;
pub use transaction::{Statement, Transaction, TransactionId, TransactionStatus};
