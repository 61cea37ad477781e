mod common;

use std::time::Duration;

use crawlstore::{AsyncWriteCoordinator, Error, Statement, WriteCoordinator};

/// Many tasks enqueueing through the async facade.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_producers_drain_completely() {
    let (_dir, path) = common::temp_db("async.db");
    common::create_table(&path, "t");
    let db = AsyncWriteCoordinator::with_config(common::fast_config(&path, 4, 5))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for task in 0..10_i64 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                db.enqueue(common::insert(task * 100 + i)).unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = db.await_drain(Duration::from_secs(30)).await.unwrap();
    assert_eq!(stats.successful_saves, 100);
    assert_eq!(stats.success_rate, 100.0);
    assert_eq!(common::count_rows(&path, "t"), 100);

    assert!(db.shutdown().await.unwrap());
}

#[tokio::test]
async fn async_open_reports_bad_config() {
    let (_dir, path) = common::temp_db("bad.db");

    let err = AsyncWriteCoordinator::open(&path, 0, 1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

/// Sync and async handles over one coordinator see the same state.
#[tokio::test]
async fn async_wraps_existing_coordinator() {
    let (_dir, path) = common::temp_db("wrap.db");
    common::create_table(&path, "t");
    let sync = WriteCoordinator::with_config(common::fast_config(&path, 2, 3)).unwrap();
    let db = AsyncWriteCoordinator::from(sync.clone());

    assert!(db.execute(common::insert(1)).await.unwrap());
    assert!(!db.execute(Statement::new("INSERT INTO t (id) VALUES (1)")).await.unwrap());
    assert_eq!(db.retry_failed().await.unwrap(), 0);

    assert_eq!(sync.stats().successful_saves, 1);
    assert_eq!(db.stats().failed_saves, 1);
    assert_eq!(db.pool_status().max_size, 2);

    sync.shutdown();
    assert!(db.as_sync().is_closed());
}
