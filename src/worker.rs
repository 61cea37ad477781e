//! # Background Writer
//!
//! One dedicated thread drains the write queue in FIFO order, running each
//! transaction through the retry pipeline.
//!
//! ```text
//!   enqueue() ──try_send──► [ sync_channel(queue_capacity) ] ──recv──► worker
//!      │                                                                │
//!      └── pending.add()                              pipeline.run() ───┤
//!                                                   pending.complete() ─┘
//! ```
//!
//! ## Shutdown
//!
//! `shutdown()` sends [`QueueItem::Shutdown`] behind whatever is already
//! queued, so queued work finishes first. If that takes longer than the
//! shutdown timeout, the coordinator sets the abort flag and stops waiting:
//! the worker finishes the transaction it is on, drops the rest of the queue
//! and exits on its own.
//!
//! The pending counter, not the channel, is what `await_drain` watches. An
//! item is pending from just before it is sent until the worker has finished
//! running it, so "queue empty" never races with "worker mid-transaction".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, RunKind};
use crate::transaction::Transaction;

/// Name given to the writer thread.
const WORKER_THREAD_NAME: &str = "crawlstore-writer";

/// Items travelling through the write queue.
#[derive(Debug)]
pub(crate) enum QueueItem {
    /// Run this transaction.
    Transaction(Transaction),

    /// Stop after everything queued before this.
    Shutdown,
}

// =============================================================================
// Pending Tracker
// =============================================================================

/// Count of enqueued transactions the worker has not finished yet.
#[derive(Debug, Default)]
pub(crate) struct PendingTracker {
    count: Mutex<usize>,
    drained: Condvar,
}

impl PendingTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self) {
        *self.count.lock() += 1;
    }

    pub(crate) fn complete(&self) {
        self.complete_many(1);
    }

    pub(crate) fn complete_many(&self, n: usize) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(n);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn len(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until nothing is pending or `timeout` elapses.
    /// Returns true if the queue drained.
    pub(crate) fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.drained.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Handle to the running writer thread.
#[derive(Debug)]
pub(crate) struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the thread exits, normally or by panic.
    done_rx: Receiver<()>,
    abort: Arc<AtomicBool>,
}

impl Worker {
    /// Spawns the writer thread over `queue_rx`.
    pub(crate) fn spawn(
        pipeline: Arc<Pipeline>,
        pending: Arc<PendingTracker>,
        queue_rx: Receiver<QueueItem>,
    ) -> Result<Self> {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let abort = Arc::new(AtomicBool::new(false));
        let worker_abort = Arc::clone(&abort);

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let _done = done_tx;
                run_worker(&pipeline, &pending, &queue_rx, &worker_abort);
            })
            .map_err(Error::Spawn)?;

        Ok(Self {
            handle,
            done_rx,
            abort,
        })
    }

    /// Tells the worker to stop after its current transaction.
    pub(crate) fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Waits up to `timeout` for the thread to exit.
    ///
    /// Returns false if it did not; the thread is then aborted and detached.
    pub(crate) fn join(self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("writer thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abort();
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "writer thread did not stop in time, detaching"
                );
                false
            }
        }
    }
}

/// The writer thread's main loop.
fn run_worker(
    pipeline: &Pipeline,
    pending: &PendingTracker,
    queue_rx: &Receiver<QueueItem>,
    abort: &AtomicBool,
) {
    debug!("writer thread started");

    while let Ok(item) = queue_rx.recv() {
        match item {
            QueueItem::Transaction(mut txn) => {
                if abort.load(Ordering::SeqCst) {
                    let abandoned = 1 + abandon_remaining(queue_rx);
                    pending.complete_many(abandoned);
                    warn!(abandoned, "writer aborted, dropping queued transactions");
                    break;
                }
                pipeline.run(&mut txn, RunKind::Fresh);
                pending.complete();
            }
            QueueItem::Shutdown => {
                let abandoned = abandon_remaining(queue_rx);
                if abandoned > 0 {
                    pending.complete_many(abandoned);
                    warn!(abandoned, "transactions queued behind the shutdown sentinel were dropped");
                }
                break;
            }
        }
    }

    debug!("writer thread stopped");
}

/// Empties the queue without running anything. Returns the number of
/// transactions dropped.
fn abandon_remaining(queue_rx: &Receiver<QueueItem>) -> usize {
    queue_rx
        .try_iter()
        .filter(|item| matches!(item, QueueItem::Transaction(_)))
        .count()
}
