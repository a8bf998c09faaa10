use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreResult;
use crate::store::{keys, Store};

/// Process-wide execution counters, written by processors and read by
/// external reporting. `processed` moves once per attempted execution;
/// `failed` additionally when the attempt raised.
#[derive(Debug, Default)]
pub struct Stats {
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Every registered queue with its pending length.
pub async fn queues_with_sizes(store: &dyn Store) -> StoreResult<Vec<(String, u64)>> {
    let mut names = store.smembers(keys::QUEUES_SET).await?;
    names.sort();
    let mut sizes = Vec::with_capacity(names.len());
    for name in names {
        let len = store.llen(&keys::queue_key(&name)).await?;
        sizes.push((name, len));
    }
    Ok(sizes)
}

/// Total count of jobs waiting across all registered queues.
pub async fn backlog(store: &dyn Store) -> StoreResult<u64> {
    Ok(queues_with_sizes(store)
        .await?
        .into_iter()
        .map(|(_, len)| len)
        .sum())
}
