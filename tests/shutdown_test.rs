mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crawlstore::{CoordinatorConfig, Error, NoFaults, Statement};

/// Shutdown with 5 transactions still queued returns within its bound, even
/// though the writer is stuck on the transaction ahead of them.
#[test]
fn shutdown_with_queued_work_returns_within_timeout() {
    let (_dir, path) = common::temp_db("stuck.db");
    let gate = Arc::new(common::Gate::default());
    let config = CoordinatorConfig {
        shutdown_timeout: Duration::from_millis(300),
        ..common::fast_config(&path, 2, 3)
    };
    let db = common::open_with_faults(&path, config, gate.clone());

    db.enqueue(common::insert(0)).unwrap();
    gate.wait_entered(1);
    for id in 1..=5 {
        db.enqueue(common::insert(id)).unwrap();
    }
    assert_eq!(db.stats().queue_size, 6);

    let start = Instant::now();
    let joined = db.shutdown();
    let elapsed = start.elapsed();

    assert!(!joined, "writer is held at the gate and cannot finish");
    assert!(elapsed < Duration::from_secs(3), "shutdown took {elapsed:?}");

    // Let the detached writer finish its transaction; the rest are dropped.
    gate.open();
    let deadline = Instant::now() + Duration::from_secs(10);
    while db.stats().queue_size > 0 {
        assert!(Instant::now() < deadline, "writer never wound down");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(common::count_rows(&path, "t") <= 1);
}

/// Work queued before shutdown finishes when there is time for it.
#[test]
fn graceful_shutdown_drains_queue() {
    let (_dir, path) = common::temp_db("graceful.db");
    let db = common::open_with_faults(&path, common::fast_config(&path, 2, 3), Arc::new(NoFaults));

    for id in 0..20 {
        db.enqueue(common::insert(id)).unwrap();
    }

    assert!(db.shutdown());
    assert_eq!(common::count_rows(&path, "t"), 20);
    assert_eq!(db.stats().successful_saves, 20);
}

#[test]
fn coordinator_is_unusable_after_shutdown() {
    let (_dir, path) = common::temp_db("closed.db");
    let db = common::open_with_faults(&path, common::fast_config(&path, 2, 3), Arc::new(NoFaults));
    let clone = db.clone();

    assert!(db.shutdown());
    assert!(db.shutdown(), "second shutdown is a no-op");

    assert!(matches!(clone.execute(common::insert(1)), Err(Error::ShutDown)));
    assert!(matches!(clone.execute_batch(vec![common::insert(1)]), Err(Error::ShutDown)));
    assert!(matches!(clone.enqueue(common::insert(1)), Err(Error::ShutDown)));
    assert!(matches!(
        clone.enqueue_batch(vec![Statement::new("DELETE FROM t")]),
        Err(Error::ShutDown)
    ));
    assert_eq!(clone.retry_failed(), 0);
    assert!(clone.is_closed());

    let stats = clone.await_drain(Duration::from_millis(10));
    assert_eq!(stats.total_attempts, 0);
}

/// Producers still enqueueing while shutdown runs either get `ShutDown` or
/// have their transaction committed. Nothing is left counted as pending.
#[test]
fn enqueue_racing_shutdown_loses_nothing() {
    let (_dir, path) = common::temp_db("race.db");
    let config = CoordinatorConfig {
        queue_capacity: 256,
        shutdown_timeout: Duration::from_secs(30),
        ..common::fast_config(&path, 2, 3)
    };
    let db = common::open_with_faults(&path, config, Arc::new(NoFaults));

    let producers: Vec<_> = (0..12_i64)
        .map(|producer| {
            let db = db.clone();
            thread::spawn(move || {
                let mut accepted = 0_i64;
                let mut next = producer * 1_000_000;
                loop {
                    match db.enqueue(common::insert(next)) {
                        Ok(_) => {
                            accepted += 1;
                            next += 1;
                        }
                        Err(Error::QueueFull { .. }) => thread::yield_now(),
                        Err(Error::ShutDown) => return accepted,
                        Err(err) => panic!("unexpected enqueue error: {err}"),
                    }
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    assert!(db.shutdown());

    let accepted: i64 = producers.into_iter().map(|p| p.join().unwrap()).sum();
    let stats = db.stats();
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.successful_saves as i64, accepted);
    assert_eq!(common::count_rows(&path, "t"), accepted);
}
