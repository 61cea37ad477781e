//! # Write Coordinator
//!
//! The public entry point. One coordinator owns one database file: a pool of
//! connections, the retry pipeline, the statistics ledger, and the background
//! writer.
//!
//! ## Two Write Paths
//!
//! ```text
//!   producer thread                            producer thread
//!        │                                          │
//!        │ execute() / execute_batch()              │ enqueue() / enqueue_batch()
//!        ▼                                          ▼
//!   ┌──────────────┐                       ┌────────────────┐
//!   │   pipeline   │◄──── same code ──────►│  bounded queue │──► writer thread
//!   │ (this thread)│                       └────────────────┘      │
//!   └──────┬───────┘                                               ▼
//!          │                                                  pipeline
//!          ▼                                                       │
//!     Ok(bool)                                      stats + failed ledger
//! ```
//!
//! `execute*` blocks the caller until its transaction commits or gives up.
//! `enqueue*` returns an id immediately; the outcome is visible only through
//! [`stats`](WriteCoordinator::stats) and
//! [`await_drain`](WriteCoordinator::await_drain).
//!
//! ## Ordering
//!
//! Queued transactions commit in submission order: one queue, one worker.
//! There is no ordering between `execute` calls, or between `execute` and
//! `enqueue`.
//!
//! ## Rust Concepts
//!
//! - **Cheap `Clone`**: the coordinator is an `Arc` around shared state, so
//!   every producer thread can hold its own handle
//! - **Interior mutability**: all operations take `&self`; the worker handle
//!   sits in a `Mutex<Option<_>>` so `shutdown` can take it exactly once
//! - **Admission lock**: `enqueue*` holds a read guard across its closed
//!   check and send; `shutdown` takes the write guard to close, so every
//!   accepted transaction is queued ahead of the sentinel

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::fault::{FaultInjector, NoFaults};
use crate::pipeline::{Pipeline, RunKind};
use crate::pool::{ConnectionPool, PoolStatus};
use crate::stats::StatsSnapshot;
use crate::transaction::{Statement, Transaction, TransactionId};
use crate::worker::{PendingTracker, QueueItem, Worker};

/// Poll interval while waiting for queue space to post the shutdown sentinel.
const SENTINEL_RETRY_INTERVAL: Duration = Duration::from_millis(5);

struct Inner {
    pipeline: Arc<Pipeline>,
    pending: Arc<PendingTracker>,
    queue_tx: SyncSender<QueueItem>,
    queue_capacity: usize,
    worker: Mutex<Option<Worker>>,
    /// Held shared by `submit` and exclusively while `shutdown` flips
    /// `closed`, so no transaction can land behind the sentinel.
    admission: RwLock<()>,
    closed: AtomicBool,
    shutdown_timeout: Duration,
}

/// Resilient write coordinator for one SQLite database.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use crawlstore::{Statement, WriteCoordinator};
///
/// # fn main() -> crawlstore::Result<()> {
/// let coordinator = WriteCoordinator::open("listings.db", 10, 5)?;
///
/// coordinator.execute(Statement::new(
///     "CREATE TABLE IF NOT EXISTS listings (id INTEGER PRIMARY KEY, price INTEGER)",
/// ))?;
///
/// for id in 0..100_i64 {
///     coordinator.enqueue(
///         Statement::new("INSERT INTO listings VALUES (?1, ?2)")
///             .bind(id)
///             .bind(id * 1_000),
///     )?;
/// }
///
/// let stats = coordinator.await_drain(Duration::from_secs(60));
/// assert_eq!(stats.success_rate, 100.0);
/// coordinator.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WriteCoordinator {
    inner: Arc<Inner>,
}

impl WriteCoordinator {
    /// Opens a coordinator with default settings apart from pool size and
    /// retry count.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` if either count is zero
    /// - `Error::Sqlite` if the database can't be opened
    pub fn open(db_path: impl AsRef<Path>, max_connections: usize, max_retries: u32) -> Result<Self> {
        Self::with_config(CoordinatorConfig {
            max_connections,
            max_retries,
            ..CoordinatorConfig::new(db_path)
        })
    }

    /// Opens a coordinator from a full configuration.
    pub fn with_config(config: CoordinatorConfig) -> Result<Self> {
        Self::with_fault_injector(config, Arc::new(NoFaults))
    }

    /// Opens a coordinator whose pipeline consults `faults` on every attempt.
    pub fn with_fault_injector(config: CoordinatorConfig, faults: Arc<dyn FaultInjector>) -> Result<Self> {
        config.validate()?;

        let pool = ConnectionPool::open(
            &config.db_path,
            config.pragmas.clone(),
            config.max_connections,
            config.acquire_timeout,
        )?;
        let pipeline = Arc::new(Pipeline::new(
            pool,
            config.max_retries,
            config.backoff.clone(),
            config.checkpoint_on_contention,
            faults,
        ));
        let pending = Arc::new(PendingTracker::new());

        let (queue_tx, queue_rx) = mpsc::sync_channel(config.queue_capacity);
        let worker = Worker::spawn(Arc::clone(&pipeline), Arc::clone(&pending), queue_rx)?;

        info!(
            path = %config.db_path.display(),
            max_connections = config.max_connections,
            max_retries = config.max_retries,
            queue_capacity = config.queue_capacity,
            "write coordinator opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                pending,
                queue_tx,
                queue_capacity: config.queue_capacity,
                worker: Mutex::new(Some(worker)),
                admission: RwLock::new(()),
                closed: AtomicBool::new(false),
                shutdown_timeout: config.shutdown_timeout,
            }),
        })
    }

    // =========================================================================
    // Synchronous path
    // =========================================================================

    /// Runs one statement on the calling thread, retrying contention.
    ///
    /// Returns `Ok(true)` if it committed and `Ok(false)` if it gave up.
    ///
    /// # Errors
    ///
    /// `Error::ShutDown` after [`shutdown`](Self::shutdown).
    pub fn execute(&self, statement: Statement) -> Result<bool> {
        self.run_now(Transaction::single(statement))
    }

    /// Runs `statements` as one atomic transaction on the calling thread.
    ///
    /// Either every statement commits or none does. An empty batch commits
    /// trivially.
    pub fn execute_batch(&self, statements: Vec<Statement>) -> Result<bool> {
        self.run_now(Transaction::new(statements))
    }

    fn run_now(&self, mut txn: Transaction) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.pipeline.run(&mut txn, RunKind::Fresh))
    }

    // =========================================================================
    // Queued path
    // =========================================================================

    /// Queues one statement for the background writer.
    ///
    /// # Errors
    ///
    /// - `Error::QueueFull` if `queue_capacity` transactions are pending
    /// - `Error::ShutDown` after [`shutdown`](Self::shutdown)
    pub fn enqueue(&self, statement: Statement) -> Result<TransactionId> {
        self.submit(Transaction::single(statement))
    }

    /// Queues `statements` as one atomic transaction.
    pub fn enqueue_batch(&self, statements: Vec<Statement>) -> Result<TransactionId> {
        self.submit(Transaction::new(statements))
    }

    fn submit(&self, txn: Transaction) -> Result<TransactionId> {
        let _admit = self.inner.admission.read();
        self.ensure_open()?;
        let id = txn.id().clone();

        self.inner.pending.add();
        match self.inner.queue_tx.try_send(QueueItem::Transaction(txn)) {
            Ok(()) => {
                debug!(txn_id = %id, "transaction queued");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                self.inner.pending.complete();
                Err(Error::QueueFull {
                    capacity: self.inner.queue_capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.inner.pending.complete();
                Err(Error::ShutDown)
            }
        }
    }

    // =========================================================================
    // Failed ledger and draining
    // =========================================================================

    /// Re-runs every transaction in the failed ledger on the calling thread.
    ///
    /// Transactions that fail again, on contention or otherwise, go back into
    /// the ledger. Returns how many committed. Returns 0 without touching the
    /// ledger after shutdown.
    pub fn retry_failed(&self) -> usize {
        if self.is_closed() {
            return 0;
        }

        let failed = self.inner.pipeline.ledger.take_failed();
        if failed.is_empty() {
            return 0;
        }

        let total = failed.len();
        let mut recovered = 0;
        for mut txn in failed {
            if self.inner.pipeline.run(&mut txn, RunKind::Retry) {
                recovered += 1;
            }
        }

        info!(recovered, still_failed = total - recovered, "retried failed transactions");
        recovered
    }

    /// Waits up to `timeout` for the queue to empty, then runs one
    /// [`retry_failed`](Self::retry_failed) pass and returns the statistics.
    ///
    /// The retry pass runs even if the timeout fired.
    pub fn await_drain(&self, timeout: Duration) -> StatsSnapshot {
        if !self.inner.pending.wait_empty(timeout) {
            warn!(
                pending = self.inner.pending.len(),
                timeout_ms = timeout.as_millis() as u64,
                "queue did not drain before timeout"
            );
        }
        self.retry_failed();
        self.stats()
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Current statistics. `queue_size` counts queued plus in-progress
    /// background transactions.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.pipeline.ledger.snapshot(self.inner.pending.len())
    }

    /// Current pool occupancy.
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pipeline.pool.status()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ShutDown)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops the background writer and closes the pool.
    ///
    /// Work queued before the call still runs if it finishes within the
    /// shutdown timeout; anything left after that is dropped uncommitted.
    /// Always returns, bounded by the timeout plus whatever the writer's
    /// current transaction needs to wind down.
    ///
    /// Returns true if the writer stopped in time. Calling it again is a
    /// no-op that returns true.
    pub fn shutdown(&self) -> bool {
        {
            let _admit = self.inner.admission.write();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return true;
            }
        }

        let Some(worker) = self.inner.worker.lock().take() else {
            return true;
        };

        let deadline = Instant::now() + self.inner.shutdown_timeout;
        if !self.post_sentinel(deadline) {
            worker.abort();
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let joined = worker.join(remaining);
        let closed_connections = self.inner.pipeline.pool.close();

        info!(
            joined,
            abandoned = self.inner.pending.len(),
            closed_connections,
            "write coordinator shut down"
        );
        joined
    }

    /// Places the shutdown sentinel behind queued work, waiting for space
    /// until `deadline`.
    fn post_sentinel(&self, deadline: Instant) -> bool {
        loop {
            match self.inner.queue_tx.try_send(QueueItem::Shutdown) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return true,
                Err(TrySendError::Full(_)) if Instant::now() < deadline => {
                    thread::sleep(SENTINEL_RETRY_INTERVAL);
                }
                Err(TrySendError::Full(_)) => {
                    warn!("queue still full at shutdown deadline, aborting writer");
                    return false;
                }
            }
        }
    }
}

impl fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("closed", &self.is_closed())
            .field("pending", &self.inner.pending.len())
            .field("pool", &self.pool_status())
            .finish()
    }
}
