#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crawlstore::fault::contention_error;
use crawlstore::{
    BackoffPolicy, ContentionKind, CoordinatorConfig, FaultInjector, Statement, Transaction,
    WriteCoordinator,
};
use rusqlite::{Connection, OpenFlags};

/// Temp directory plus a database path inside it. Keep the dir alive for the
/// whole test.
pub fn temp_db(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Small pool, no backoff sleeps.
pub fn fast_config(path: &Path, max_connections: usize, max_retries: u32) -> CoordinatorConfig {
    CoordinatorConfig {
        max_connections,
        max_retries,
        backoff: BackoffPolicy::immediate(),
        ..CoordinatorConfig::new(path)
    }
}

/// Creates `table` with an integer primary key `id` and a text `payload`.
pub fn create_table(path: &Path, table: &str) {
    let conn = open_read_write(path);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, payload TEXT)"
    ))
    .expect("create table");
}

/// Opens a coordinator over a fresh database that already has table `t`.
pub fn open_with_faults(
    path: &Path,
    config: CoordinatorConfig,
    faults: Arc<dyn FaultInjector>,
) -> WriteCoordinator {
    create_table(path, "t");
    WriteCoordinator::with_fault_injector(config, faults).expect("open coordinator")
}

pub fn insert(id: i64) -> Statement {
    Statement::new("INSERT INTO t (id, payload) VALUES (?1, ?2)")
        .bind(id)
        .bind(format!("row-{id}"))
}

pub fn count_rows(path: &Path, table: &str) -> i64 {
    open_read_only(path)
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

pub fn ids(path: &Path, table: &str) -> Vec<i64> {
    let conn = open_read_only(path);
    let mut stmt = conn
        .prepare(&format!("SELECT id FROM {table} ORDER BY rowid"))
        .expect("prepare");
    stmt.query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect ids")
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn open_read_write(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("open read-write connection");
    conn.execute_batch("PRAGMA journal_mode = WAL").expect("enable wal");
    conn
}

/// Holds every attempt at the injector until [`Gate::open`] is called.
#[derive(Debug, Default)]
pub struct Gate {
    open: AtomicBool,
    entered: AtomicU64,
}

impl Gate {
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn entered(&self) -> u64 {
        self.entered.load(Ordering::SeqCst)
    }

    /// Spins until at least `n` attempts have reached the gate.
    pub fn wait_entered(&self, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.entered() < n {
            assert!(Instant::now() < deadline, "gate never reached {n} entries");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl FaultInjector for Gate {
    fn before_statements(&self, _txn: &Transaction, _attempt: u32) -> Option<rusqlite::Error> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        None
    }
}

/// Injects `kind` on every attempt while switched on.
#[derive(Debug)]
pub struct Switch {
    on: AtomicBool,
    kind: ContentionKind,
}

impl Switch {
    pub fn new(on: bool, kind: ContentionKind) -> Self {
        Self {
            on: AtomicBool::new(on),
            kind,
        }
    }

    pub fn set(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
    }
}

impl FaultInjector for Switch {
    fn before_statements(&self, _txn: &Transaction, _attempt: u32) -> Option<rusqlite::Error> {
        self.on
            .load(Ordering::SeqCst)
            .then(|| contention_error(self.kind))
    }
}
