//! # Connection Pool
//!
//! A bounded set of pre-opened, identically configured connections.
//!
//! ```text
//!            acquire()                               drop(guard)
//!   caller ────────────► idle non-empty? ── yes ──► pooled guard ──► back to idle
//!                             │                                      (or closed if
//!                             no                                      pool full/closed)
//!                             ▼
//!                 wait on condvar ≤ acquire_timeout
//!                             │
//!                     still empty
//!                             ▼
//!               open overflow connection ─────► overflow guard ──► always closed
//! ```
//!
//! ## Invariants
//!
//! - `idle + checked_out <= max_size` at every observation point
//! - Overflow connections are never pooled, so once load goes away the pool
//!   holds at most `max_size` connections
//!
//! Connections are fungible: nothing is pinned to a particular one.
//!
//! ## Rust Concepts
//!
//! - **RAII guard**: [`PooledConnection`] returns its connection in `Drop`, so
//!   an early `?` return can't leak a connection
//! - **`Connection: Send + !Sync`**: a connection moves between threads freely
//!   but is only ever used by whoever holds the guard

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PragmaConfig;
use crate::connection::open_connection;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Connection>,
    checked_out: usize,
    overflow_in_flight: usize,
    closed: bool,
}

/// Bounded pool of SQLite connections with overflow fallback.
#[derive(Debug)]
pub struct ConnectionPool {
    path: PathBuf,
    pragmas: PragmaConfig,
    max_size: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Opens `max_size` connections up front.
    ///
    /// # Errors
    ///
    /// The first connection that fails to open aborts pool creation.
    pub fn open(
        path: impl Into<PathBuf>,
        pragmas: PragmaConfig,
        max_size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let path = path.into();
        let mut idle = Vec::with_capacity(max_size);
        for _ in 0..max_size {
            idle.push(open_connection(&path, &pragmas)?);
        }

        Ok(Self {
            path,
            pragmas,
            max_size,
            acquire_timeout,
            state: Mutex::new(PoolState {
                idle,
                ..PoolState::default()
            }),
            available: Condvar::new(),
        })
    }

    /// Checks out a connection, waiting up to the acquire timeout before
    /// falling back to a fresh overflow connection.
    ///
    /// # Errors
    ///
    /// - `Error::ShutDown` if the pool is closed
    /// - `Error::Sqlite` if an overflow connection can't be opened
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(Error::ShutDown);
            }
            if let Some(conn) = state.idle.pop() {
                state.checked_out += 1;
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                    overflow: false,
                });
            }
            if Instant::now() >= deadline {
                break;
            }
            self.available.wait_until(&mut state, deadline);
        }

        state.overflow_in_flight += 1;
        let in_flight = state.overflow_in_flight;
        drop(state);

        debug!(overflow_in_flight = in_flight, "pool exhausted, opening overflow connection");
        match open_connection(&self.path, &self.pragmas) {
            Ok(conn) => Ok(PooledConnection {
                pool: self,
                conn: Some(conn),
                overflow: true,
            }),
            Err(err) => {
                self.state.lock().overflow_in_flight -= 1;
                Err(err)
            }
        }
    }

    fn release(&self, conn: Connection, overflow: bool) {
        let mut state = self.state.lock();
        let discard = if overflow {
            state.overflow_in_flight -= 1;
            Some(conn)
        } else {
            state.checked_out -= 1;
            if state.closed || state.idle.len() + state.checked_out >= self.max_size {
                Some(conn)
            } else {
                state.idle.push(conn);
                None
            }
        };
        drop(state);
        self.available.notify_one();

        if let Some(conn) = discard {
            close_quietly(conn);
        }
    }

    /// Closes every idle connection and refuses further checkouts.
    ///
    /// Connections still checked out are closed when their guards drop.
    /// Returns the number of connections closed now. Idempotent.
    pub fn close(&self) -> usize {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.available.notify_all();

        let count = idle.len();
        for conn in idle {
            close_quietly(conn);
        }
        count
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            max_size: self.max_size,
            idle: state.idle.len(),
            checked_out: state.checked_out,
            overflow_in_flight: state.overflow_in_flight,
            closed: state.closed,
        }
    }
}

fn close_quietly(conn: Connection) {
    if let Err((_conn, err)) = conn.close() {
        warn!(error = %err, "failed to close connection cleanly");
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub idle: usize,
    /// Pooled connections currently checked out (overflow excluded).
    pub checked_out: usize,
    pub overflow_in_flight: usize,
    pub closed: bool,
}

impl PoolStatus {
    /// Pooled connections in existence: idle plus checked out.
    pub fn in_circulation(&self) -> usize {
        self.idle + self.checked_out
    }
}

// =============================================================================
// Guard
// =============================================================================

/// A checked-out connection. Dereferences to [`Connection`].
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    /// `Some` until `Drop` hands it back.
    conn: Option<Connection>,
    overflow: bool,
}

impl PooledConnection<'_> {
    /// True if this connection will be closed rather than pooled on drop.
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.overflow);
        }
    }
}
