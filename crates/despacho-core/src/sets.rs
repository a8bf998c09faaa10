use std::sync::Arc;

use tracing::debug;

use crate::error::StoreResult;
use crate::job::{JobDescriptor, DEFAULT_QUEUE};
use crate::store::{keys, BatchOp, Store};

/// One member of a time-ordered set: the score it sits at, the decoded
/// descriptor, and the raw payload it is keyed by.
#[derive(Debug, Clone)]
pub struct SortedEntry {
    pub score: f64,
    pub job: JobDescriptor,
    pub raw: String,
}

/// How far around a score hint `find` scans before falling back to a full
/// scan. Scores are fractional seconds, so ±1s comfortably covers clock
/// rounding at the call site.
const FIND_WINDOW: f64 = 1.0;

/// Sweep batch size. Bounds the number of members held in memory per round;
/// the sweep loops until the due range is empty.
const SWEEP_PAGE: u64 = 100;

/// A time-ordered job set (`schedule` or `retry`). Score is the epoch time
/// at which the member becomes eligible for re-delivery. `(score, payload)`
/// pairs need not be unique; lookups decode candidates and match on jid.
pub struct JobSet {
    store: Arc<dyn Store>,
    name: &'static str,
}

impl JobSet {
    pub fn scheduled(store: Arc<dyn Store>) -> Self {
        Self { store, name: keys::SCHEDULE_SET }
    }

    pub fn retry(store: Arc<dyn Store>) -> Self {
        Self { store, name: keys::RETRY_SET }
    }

    fn dead(store: Arc<dyn Store>) -> Self {
        Self { store, name: keys::DEAD_SET }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert a raw payload at `at` (epoch seconds, possibly fractional).
    pub async fn add(&self, raw: &str, at: f64) -> StoreResult<bool> {
        self.store.zadd(self.name, at, raw).await
    }

    /// Serialize and insert a descriptor at `at`.
    pub async fn schedule_job(&self, job: &JobDescriptor, at: f64) -> StoreResult<bool> {
        let raw = serde_json::to_string(job)?;
        self.add(&raw, at).await
    }

    pub async fn size(&self) -> StoreResult<u64> {
        self.store.zcard(self.name).await
    }

    /// Move every member whose score is ≤ `now` back onto its target queue.
    /// The per-member remove is the atomic claim: under concurrent sweepers
    /// only the one whose remove succeeded pushes the payload, so a job is
    /// never delivered twice from one entry. Store errors propagate.
    pub async fn sweep(&self, now: f64) -> StoreResult<u64> {
        let mut swept = 0u64;
        loop {
            let due = self
                .store
                .zrange_by_score(self.name, f64::NEG_INFINITY, now, Some((0, SWEEP_PAGE)))
                .await?;
            if due.is_empty() {
                break;
            }
            for (raw, _) in due {
                if self.store.zrem(self.name, &raw).await? {
                    let queue = target_queue(&raw);
                    self.store
                        .batch(vec![
                            BatchOp::Sadd {
                                key: keys::QUEUES_SET.to_string(),
                                member: queue.clone(),
                            },
                            BatchOp::Lpush {
                                key: keys::queue_key(&queue),
                                payloads: vec![raw],
                            },
                        ])
                        .await?;
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            debug!(set = self.name, count = swept, "swept due entries onto live queues");
        }
        Ok(swept)
    }

    /// Locate an entry by job id. With a score hint only a narrow window is
    /// scanned; on a miss (or without a hint) the whole set is, since score
    /// alone is not a unique key and no separate index exists.
    pub async fn find(&self, jid: &str, score_hint: Option<f64>) -> StoreResult<Option<SortedEntry>> {
        if let Some(hint) = score_hint {
            let hit = self.scan(jid, hint - FIND_WINDOW, hint + FIND_WINDOW).await?;
            if hit.is_some() {
                return Ok(hit);
            }
        }
        self.scan(jid, f64::NEG_INFINITY, f64::INFINITY).await
    }

    async fn scan(&self, jid: &str, min: f64, max: f64) -> StoreResult<Option<SortedEntry>> {
        let candidates = self.store.zrange_by_score(self.name, min, max, None).await?;
        for (raw, score) in candidates {
            if let Ok(job) = serde_json::from_str::<JobDescriptor>(&raw) {
                if job.jid == jid {
                    return Ok(Some(SortedEntry { score, job, raw }));
                }
            }
        }
        Ok(None)
    }

    /// Remove a specific entry by its raw payload.
    pub async fn delete(&self, raw: &str) -> StoreResult<bool> {
        self.store.zrem(self.name, raw).await
    }

    /// Decode every member, in score order. Members that no longer decode
    /// are skipped rather than failing the listing.
    pub async fn entries(&self) -> StoreResult<Vec<SortedEntry>> {
        let members = self
            .store
            .zrange_by_score(self.name, f64::NEG_INFINITY, f64::INFINITY, None)
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|(raw, score)| {
                serde_json::from_str::<JobDescriptor>(&raw)
                    .ok()
                    .map(|job| SortedEntry { score, job, raw })
            })
            .collect())
    }

    /// Move every member back to its original queue as one atomic batch.
    pub async fn retry_all(&self) -> StoreResult<u64> {
        let members = self
            .store
            .zrange_by_score(self.name, f64::NEG_INFINITY, f64::INFINITY, None)
            .await?;
        if members.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(members.len() * 2 + 1);
        for (raw, _) in &members {
            let queue = target_queue(raw);
            ops.push(BatchOp::Sadd {
                key: keys::QUEUES_SET.to_string(),
                member: queue.clone(),
            });
            ops.push(BatchOp::Lpush {
                key: keys::queue_key(&queue),
                payloads: vec![raw.clone()],
            });
        }
        ops.push(BatchOp::Del {
            key: self.name.to_string(),
        });
        self.store.batch(ops).await?;
        Ok(members.len() as u64)
    }

    /// Delete every member as one atomic operation; returns the count that
    /// was present.
    pub async fn clear(&self) -> StoreResult<u64> {
        let count = self.size().await?;
        self.store
            .batch(vec![BatchOp::Del {
                key: self.name.to_string(),
            }])
            .await?;
        Ok(count)
    }
}

fn target_queue(raw: &str) -> String {
    serde_json::from_str::<JobDescriptor>(raw)
        .map(|job| job.queue_name().to_string())
        .unwrap_or_else(|_| DEFAULT_QUEUE.to_string())
}

/// Size and age bounds enforced on every dead-set insertion.
#[derive(Debug, Clone)]
pub struct DeadSetBounds {
    pub max_jobs: u64,
    pub timeout_secs: f64,
}

impl Default for DeadSetBounds {
    fn default() -> Self {
        Self {
            max_jobs: 10_000,
            timeout_secs: 180.0 * 24.0 * 60.0 * 60.0,
        }
    }
}

/// Terminal store for jobs that exhausted their retries, bounded by age and
/// count. Both bounds are enforced inside every `kill`, not periodically.
pub struct DeadSet {
    set: JobSet,
    bounds: DeadSetBounds,
}

impl DeadSet {
    pub fn new(store: Arc<dyn Store>, bounds: DeadSetBounds) -> Self {
        Self {
            set: JobSet::dead(store),
            bounds,
        }
    }

    /// Insert a serialized payload at time-of-death `now`, then trim: drop
    /// entries older than the age bound, and keep only the most recent
    /// entries within the count bound. One atomic batch.
    pub async fn kill(&self, raw: &str, now: f64) -> StoreResult<()> {
        self.set
            .store
            .batch(vec![
                BatchOp::Zadd {
                    key: self.set.name.to_string(),
                    score: now,
                    member: raw.to_string(),
                },
                BatchOp::ZremRangeByScore {
                    key: self.set.name.to_string(),
                    min: f64::NEG_INFINITY,
                    max: now - self.bounds.timeout_secs,
                },
                BatchOp::ZremRangeByRank {
                    key: self.set.name.to_string(),
                    start: 0,
                    stop: -(self.bounds.max_jobs as i64),
                },
            ])
            .await?;
        Ok(())
    }

    pub async fn find(&self, jid: &str, score_hint: Option<f64>) -> StoreResult<Option<SortedEntry>> {
        self.set.find(jid, score_hint).await
    }

    pub async fn size(&self) -> StoreResult<u64> {
        self.set.size().await
    }

    /// Push every dead job back to its original queue.
    pub async fn retry_all(&self) -> StoreResult<u64> {
        self.set.retry_all().await
    }

    pub async fn clear(&self) -> StoreResult<u64> {
        self.set.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::job::epoch_now;
    use crate::store::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn payload(jid: &str, queue: Option<&str>) -> String {
        let mut job = JobDescriptor::new("SomeWorker", vec![]);
        job.jid = jid.to_string();
        job.queue = queue.map(|q| q.to_string());
        serde_json::to_string(&job).unwrap()
    }

    fn dead_with(store: Arc<MemoryStore>, max_jobs: u64, timeout_secs: f64) -> DeadSet {
        DeadSet::new(store, DeadSetBounds { max_jobs, timeout_secs })
    }

    #[tokio::test]
    async fn kill_then_find_returns_the_entry() {
        let store = store();
        let dead = dead_with(Arc::clone(&store), 100, 1_000.0);

        let raw = payload("123123", None);
        dead.kill(&raw, epoch_now()).await.unwrap();

        let entry = dead.find("123123", None).await.unwrap().unwrap();
        assert_eq!(entry.raw, raw);
        assert_eq!(entry.job.jid, "123123");
    }

    #[tokio::test]
    async fn kill_evicts_entries_older_than_the_age_bound() {
        let store = store();
        let dead = dead_with(Arc::clone(&store), 100, 10.0);
        let now = epoch_now();

        dead.kill(&payload("000103", None), now - 11.0).await.unwrap();
        dead.kill(&payload("000102", None), now - 9.0).await.unwrap();
        dead.kill(&payload("000101", None), now).await.unwrap();

        assert!(dead.find("000103", None).await.unwrap().is_none());
        assert!(dead.find("000102", None).await.unwrap().is_some());
        assert!(dead.find("000101", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn kill_keeps_only_the_most_recent_within_the_count_bound() {
        let store = store();
        let dead = dead_with(Arc::clone(&store), 3, 1_000_000.0);
        let now = epoch_now();

        dead.kill(&payload("000101", None), now).await.unwrap();
        dead.kill(&payload("000102", None), now + 0.1).await.unwrap();
        dead.kill(&payload("000103", None), now + 0.2).await.unwrap();

        assert!(dead.find("000101", None).await.unwrap().is_none());
        assert!(dead.find("000102", None).await.unwrap().is_some());
        assert!(dead.find("000103", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn kill_does_not_trim_below_the_count_bound() {
        let store = store();
        let dead = dead_with(Arc::clone(&store), 3, 1_000_000.0);
        let now = epoch_now();

        dead.kill(&payload("a", None), now).await.unwrap();
        dead.kill(&payload("b", None), now + 0.1).await.unwrap();

        assert!(dead.find("a", None).await.unwrap().is_some());
        assert!(dead.find("b", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn find_uses_the_score_hint_window() {
        let store = store();
        let set = JobSet::retry(Arc::clone(&store) as Arc<dyn Store>);
        let at = 1_700_000_000.5;
        set.add(&payload("abc", None), at).await.unwrap();

        let entry = set.find("abc", Some(at)).await.unwrap().unwrap();
        assert_eq!(entry.score, at);

        // A wrong hint still resolves through the full-scan fallback.
        let entry = set.find("abc", Some(at + 500.0)).await.unwrap().unwrap();
        assert_eq!(entry.job.jid, "abc");
    }

    #[tokio::test]
    async fn sweep_moves_due_entries_to_their_queues() {
        let store = store();
        let set = JobSet::scheduled(Arc::clone(&store) as Arc<dyn Store>);
        let now = epoch_now();

        set.add(&payload("due-1", Some("mailers")), now - 10.0).await.unwrap();
        set.add(&payload("due-2", None), now - 5.0).await.unwrap();
        set.add(&payload("later", None), now + 3600.0).await.unwrap();

        let swept = set.sweep(now).await.unwrap();
        assert_eq!(swept, 2);

        assert_eq!(store.llen("queue:mailers").await.unwrap(), 1);
        assert_eq!(store.llen("queue:default").await.unwrap(), 1);
        assert_eq!(set.size().await.unwrap(), 1);

        let mut queues = store.smembers("queues").await.unwrap();
        queues.sort();
        assert_eq!(queues, vec!["default", "mailers"]);
    }

    #[tokio::test]
    async fn sweep_is_a_noop_when_nothing_is_due() {
        let store = store();
        let set = JobSet::retry(Arc::clone(&store) as Arc<dyn Store>);
        set.add(&payload("later", None), epoch_now() + 60.0).await.unwrap();

        assert_eq!(set.sweep(epoch_now()).await.unwrap(), 0);
        assert_eq!(set.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_all_drains_the_set_onto_the_queues() {
        let store = store();
        let set = JobSet::retry(Arc::clone(&store) as Arc<dyn Store>);
        let now = epoch_now();

        set.add(&payload("r1", Some("a")), now + 100.0).await.unwrap();
        set.add(&payload("r2", Some("b")), now + 200.0).await.unwrap();

        let moved = set.retry_all().await.unwrap();
        assert_eq!(moved, 2);
        assert_eq!(set.size().await.unwrap(), 0);
        assert_eq!(store.llen("queue:a").await.unwrap(), 1);
        assert_eq!(store.llen("queue:b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_deletes_everything_at_once() {
        let store = store();
        let set = JobSet::retry(Arc::clone(&store) as Arc<dyn Store>);
        set.add(&payload("r1", None), 1.0).await.unwrap();
        set.add(&payload("r2", None), 2.0).await.unwrap();

        assert_eq!(set.clear().await.unwrap(), 2);
        assert_eq!(set.size().await.unwrap(), 0);
        assert_eq!(store.llen("queue:default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn schedule_job_serializes_the_descriptor() {
        let store = store();
        let set = JobSet::scheduled(Arc::clone(&store) as Arc<dyn Store>);
        let mut job = JobDescriptor::new("SomeWorker", vec![serde_json::json!("a")]);
        job.queue = Some("default".to_string());

        set.schedule_job(&job, 1_700_000_000.0).await.unwrap();
        let entry = set.find(&job.jid, Some(1_700_000_000.0)).await.unwrap().unwrap();
        assert_eq!(entry.job, job);
    }
}
