mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use despacho_core::{Store, UnitOfWork, WorkerPool};
use helpers::{fetcher, harness, Counting, Stuck};

#[tokio::test]
async fn interrupted_units_return_to_their_queues() {
    let h = harness(|r| r.register("Stuck", Stuck));

    for _ in 0..2 {
        h.client.enqueue("Stuck", vec![]).await.unwrap();
    }

    let fetch = fetcher(&h, &["default"], false);
    let mut pool = WorkerPool::new(
        Arc::clone(&fetch),
        Arc::clone(&h.processor),
        2,
        Duration::from_millis(100),
    );
    pool.start();

    // Both workers pick up a stuck job each.
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.store.llen("queue:default").await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs were never fetched");

    pool.shutdown().await;

    // Nothing acknowledged, everything reclaimed.
    assert_eq!(h.store.llen("queue:default").await.unwrap(), 2);
    assert_eq!(h.stats.snapshot().processed, 0);
}

#[tokio::test]
async fn graceful_shutdown_lets_fast_jobs_finish() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = Arc::clone(&hits);
    let h = harness(move |r| r.register("Counting", Counting { hits: hits2 }));

    for _ in 0..3 {
        h.client.enqueue("Counting", vec![]).await.unwrap();
    }

    let fetch = fetcher(&h, &["default"], false);
    let mut pool = WorkerPool::new(
        Arc::clone(&fetch),
        Arc::clone(&h.processor),
        1,
        Duration::from_secs(5),
    );
    pool.start();

    tokio::time::timeout(Duration::from_secs(3), async {
        while hits.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs did not finish");

    pool.shutdown().await;

    assert_eq!(h.store.llen("queue:default").await.unwrap(), 0);
    assert_eq!(h.stats.snapshot().processed, 3);
}

#[tokio::test]
async fn bulk_requeue_grows_each_queue_by_its_share() {
    let h = harness(|r| r.register("Stuck", Stuck));
    let fetch = fetcher(&h, &["a", "b", "c"], false);

    let units = vec![
        UnitOfWork { queue: "a".into(), payload: "1".into() },
        UnitOfWork { queue: "a".into(), payload: "2".into() },
        UnitOfWork { queue: "b".into(), payload: "3".into() },
        UnitOfWork { queue: "a".into(), payload: "4".into() },
        UnitOfWork { queue: "c".into(), payload: "5".into() },
    ];
    fetch.bulk_requeue(units).await;

    assert_eq!(h.store.llen("queue:a").await.unwrap(), 3);
    assert_eq!(h.store.llen("queue:b").await.unwrap(), 1);
    assert_eq!(h.store.llen("queue:c").await.unwrap(), 1);
}
