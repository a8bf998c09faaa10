#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use despacho_core::processor::RetrySettings;
use despacho_core::sets::DeadSetBounds;
use despacho_core::{
    BasicFetch, Client, HandlerRegistry, HandlerResult, JobContext, JobHandler, MemoryStore,
    Processor, RetryPolicy, ServerChain, Stats, Store,
};

/// Handler that counts successful executions.
pub struct Counting {
    pub hits: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for Counting {
    async fn perform(&self, _args: &[Value], _ctx: &JobContext) -> HandlerResult {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that always fails with a bounded retry policy.
pub struct Failing;

#[async_trait]
impl JobHandler for Failing {
    async fn perform(&self, _args: &[Value], _ctx: &JobContext) -> HandlerResult {
        Err("expected failure".into())
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::Limit(2)
    }
}

/// Handler that sleeps far past any test deadline.
pub struct Stuck;

#[async_trait]
impl JobHandler for Stuck {
    async fn perform(&self, _args: &[Value], _ctx: &JobContext) -> HandlerResult {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(())
    }
}

/// A fully wired engine over the in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub client: Client,
    pub stats: Arc<Stats>,
    pub processor: Arc<Processor>,
}

pub fn harness(build_registry: impl FnOnce(&mut HandlerRegistry)) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    build_registry(&mut registry);
    let registry = Arc::new(registry);

    let stats = Arc::new(Stats::new());
    let processor = Arc::new(Processor::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&registry),
        ServerChain::new(),
        Arc::clone(&stats),
        RetrySettings::default(),
        DeadSetBounds::default(),
    ));
    let client = Client::new(Arc::clone(&store) as Arc<dyn Store>, registry);

    Harness {
        store,
        client,
        stats,
        processor,
    }
}

/// Fetcher over the harness store with a short timeout for tests.
pub fn fetcher(harness: &Harness, queues: &[&str], strict: bool) -> Arc<BasicFetch> {
    let names: Vec<String> = queues.iter().map(|q| q.to_string()).collect();
    Arc::new(BasicFetch::with_timeout(
        Arc::clone(&harness.store) as Arc<dyn Store>,
        &names,
        strict,
        Duration::from_millis(50),
    ))
}
