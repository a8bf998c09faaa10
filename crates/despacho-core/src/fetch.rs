use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::{keys, BatchOp, Store};

/// A dequeued-but-unacknowledged job: bare queue name plus the raw payload.
/// Owned by the fetching worker until processed or handed back through
/// `bulk_requeue`. A plain record: store access stays with the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub queue: String,
    pub payload: String,
}

/// Queue polling strategy.
///
/// In weighted mode (the default) the queue list is reshuffled and
/// deduplicated on every call before the blocking pop is issued. A queue's
/// expected service frequency is proportional to how many times it appears
/// in the configured list, and the per-call reshuffle is what prevents a
/// fixed ordering from starving the tail.
///
/// In strict mode the caller-supplied order is deduplicated once and polled
/// verbatim every call; low-priority queues may starve by construction.
pub struct BasicFetch {
    store: Arc<dyn Store>,
    queues: Vec<String>,
    unique_queues: Vec<String>,
    strict: bool,
    timeout: Duration,
}

/// Blocking-pop timeout. A pop returning nothing after this long is "no work
/// now", letting the worker loop run its liveness checks.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

fn dedup_in_order(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}

impl BasicFetch {
    pub fn new(store: Arc<dyn Store>, queue_names: &[String], strict: bool) -> Self {
        Self::with_timeout(store, queue_names, strict, FETCH_TIMEOUT)
    }

    pub fn with_timeout(
        store: Arc<dyn Store>,
        queue_names: &[String],
        strict: bool,
        timeout: Duration,
    ) -> Self {
        let queues: Vec<String> = queue_names.iter().map(|q| keys::queue_key(q)).collect();
        let unique_queues = dedup_in_order(&queues);
        Self {
            store,
            queues,
            unique_queues,
            strict,
            timeout,
        }
    }

    /// The key order for this call: fixed in strict mode, reshuffled and
    /// deduplicated per call in weighted mode.
    fn queues_cmd(&self) -> Vec<String> {
        if self.strict {
            self.unique_queues.clone()
        } else {
            let mut shuffled = self.queues.clone();
            shuffled.shuffle(&mut rand::rng());
            dedup_in_order(&shuffled)
        }
    }

    /// Block up to the timeout for a unit of work. `Ok(None)` is the timeout
    /// sentinel; store errors propagate to the caller's poll loop.
    pub async fn retrieve_work(&self) -> StoreResult<Option<UnitOfWork>> {
        let cmd_keys = self.queues_cmd();
        match self.store.bpop(&cmd_keys, self.timeout).await? {
            Some((key, payload)) => Ok(Some(UnitOfWork {
                queue: keys::queue_name(&key).to_string(),
                payload,
            })),
            None => Ok(None),
        }
    }

    /// Push in-flight units back onto their original queues in one batched
    /// operation, grouped by queue. Must not raise: on store failure the
    /// units are logged and abandoned, an accepted at-least-once gap on the
    /// shutdown path.
    pub async fn bulk_requeue(&self, units: Vec<UnitOfWork>) {
        if units.is_empty() {
            return;
        }
        debug!("re-queueing terminated jobs");

        let count = units.len();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for unit in units {
            groups.entry(unit.queue).or_default().push(unit.payload);
        }

        let ops: Vec<BatchOp> = groups
            .into_iter()
            .map(|(queue, payloads)| BatchOp::Rpush {
                key: keys::queue_key(&queue),
                payloads,
            })
            .collect();

        match self.store.batch(ops).await {
            Ok(_) => info!(count, "pushed jobs back to the store"),
            Err(e) => warn!(error = %e, count, "failed to requeue jobs"),
        }
    }
}
