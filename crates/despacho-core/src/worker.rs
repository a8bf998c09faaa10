use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::fetch::{BasicFetch, UnitOfWork};
use crate::processor::Processor;

/// Pause after a failed fetch before polling again, so a store outage does
/// not spin the workers.
const FETCH_BACKOFF: Duration = Duration::from_secs(1);

/// A fixed-size pool of workers, each running fetch → process on its own
/// task. Workers share nothing mutable beyond the stats counters and the
/// pooled store connections.
///
/// Shutdown is cooperative: workers stop fetching, get a bounded grace
/// period to finish in-flight execution, and anything still executing past
/// the deadline is aborted with its unit captured and pushed back through
/// `bulk_requeue`; a fetched-but-unacknowledged unit that is not requeued
/// is lost.
pub struct WorkerPool {
    fetch: Arc<BasicFetch>,
    processor: Arc<Processor>,
    concurrency: usize,
    grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    in_flight: Arc<Mutex<HashMap<usize, UnitOfWork>>>,
}

impl WorkerPool {
    pub fn new(
        fetch: Arc<BasicFetch>,
        processor: Arc<Processor>,
        concurrency: usize,
        grace: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            fetch,
            processor,
            concurrency,
            grace,
            shutdown_tx,
            handles: Vec::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the worker tasks. Idempotent start is not supported; call once.
    pub fn start(&mut self) {
        info!(concurrency = self.concurrency, "worker pool starting");
        for worker_id in 0..self.concurrency {
            let fetch = Arc::clone(&self.fetch);
            let processor = Arc::clone(&self.processor);
            let in_flight = Arc::clone(&self.in_flight);
            let shutdown = self.shutdown_tx.subscribe();

            self.handles.push(tokio::spawn(async move {
                worker_loop(worker_id, fetch, processor, in_flight, shutdown).await;
            }));
        }
    }

    /// Stop fetching, wait up to the grace period for in-flight work, abort
    /// the rest, and requeue whatever was still executing.
    pub async fn shutdown(mut self) {
        info!("worker pool shutting down");
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + self.grace;
        for mut handle in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }

        let leftover: Vec<UnitOfWork> = {
            let mut in_flight = self.in_flight.lock();
            in_flight.drain().map(|(_, unit)| unit).collect()
        };
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "interrupted workers, requeueing in-flight jobs");
        }
        self.fetch.bulk_requeue(leftover).await;
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    fetch: Arc<BasicFetch>,
    processor: Arc<Processor>,
    in_flight: Arc<Mutex<HashMap<usize, UnitOfWork>>>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match fetch.retrieve_work().await {
            Ok(Some(unit)) => {
                in_flight.lock().insert(worker_id, unit.clone());
                if let Err(e) = processor.process(unit).await {
                    // Bookkeeping already ran; this is the surfaced error.
                    error!(worker_id, error = %e, "job failed");
                }
                in_flight.lock().remove(&worker_id);
            }
            Ok(None) => {
                // Poll timeout: loop back around for the liveness check.
            }
            Err(e) => {
                warn!(worker_id, error = %e, "fetch failed, backing off");
                tokio::time::sleep(FETCH_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::handler::{HandlerRegistry, HandlerResult, JobContext, JobHandler};
    use crate::job::JobDescriptor;
    use crate::middleware::ServerChain;
    use crate::processor::RetrySettings;
    use crate::sets::DeadSetBounds;
    use crate::stats::Stats;
    use crate::store::{MemoryStore, Store};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for Counting {
        async fn perform(&self, _args: &[Value], _ctx: &JobContext) -> HandlerResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl JobHandler for Stuck {
        async fn perform(&self, _args: &[Value], _ctx: &JobContext) -> HandlerResult {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(())
        }
    }

    fn pool_with(
        store: Arc<MemoryStore>,
        registry: HandlerRegistry,
        concurrency: usize,
        grace: Duration,
    ) -> WorkerPool {
        let store: Arc<dyn Store> = store;
        let fetch = Arc::new(BasicFetch::with_timeout(
            Arc::clone(&store),
            &["default".to_string()],
            false,
            Duration::from_millis(50),
        ));
        let processor = Arc::new(Processor::new(
            store,
            Arc::new(registry),
            ServerChain::new(),
            Arc::new(Stats::new()),
            RetrySettings::default(),
            DeadSetBounds::default(),
        ));
        WorkerPool::new(fetch, processor, concurrency, grace)
    }

    fn payload(class: &str) -> String {
        serde_json::to_string(&JobDescriptor::new(class, vec![])).unwrap()
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let store = Arc::new(MemoryStore::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("Counting", Counting(Arc::clone(&hits)));

        for _ in 0..5 {
            store.lpush("queue:default", &[payload("Counting")]).await.unwrap();
        }

        let mut pool = pool_with(Arc::clone(&store), registry, 2, Duration::from_secs(5));
        pool.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs were not drained");

        pool.shutdown().await;
        assert_eq!(store.llen("queue:default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_requeues_interrupted_units() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = HandlerRegistry::new();
        registry.register("Stuck", Stuck);

        store.lpush("queue:default", &[payload("Stuck")]).await.unwrap();

        let mut pool = pool_with(Arc::clone(&store), registry, 1, Duration::from_millis(100));
        pool.start();

        // Wait for the worker to pick the job up.
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.llen("queue:default").await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job was never fetched");

        pool.shutdown().await;

        // The interrupted unit is back on its queue.
        assert_eq!(store.llen("queue:default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn idle_pool_shuts_down_cleanly() {
        let store = Arc::new(MemoryStore::new());
        let registry = HandlerRegistry::new();
        let mut pool = pool_with(store, registry, 3, Duration::from_secs(1));
        pool.start();

        tokio::time::timeout(Duration::from_secs(3), pool.shutdown())
            .await
            .expect("shutdown hung");
    }
}
