use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::StoreResult;
use crate::store::{BatchOp, Store};

/// In-process implementation of the `Store` trait. Single-process only,
/// used by the test suite and for local runs without a Redis server. All
/// operations take one lock, so batches are trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, Vec<(f64, String)>>,
    strings: HashMap<String, (String, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn score_cmp(a: &(f64, String), b: &(f64, String)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

impl Inner {
    fn lpush(&mut self, key: &str, payloads: &[String]) -> i64 {
        let list = self.lists.entry(key.to_string()).or_default();
        for payload in payloads {
            list.push_front(payload.clone());
        }
        list.len() as i64
    }

    fn rpush(&mut self, key: &str, payloads: &[String]) -> i64 {
        let list = self.lists.entry(key.to_string()).or_default();
        for payload in payloads {
            list.push_back(payload.clone());
        }
        list.len() as i64
    }

    fn sadd(&mut self, key: &str, member: &str) -> i64 {
        i64::from(self.sets.entry(key.to_string()).or_default().insert(member.to_string()))
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str) -> i64 {
        let zset = self.zsets.entry(key.to_string()).or_default();
        let existed = zset.iter().position(|(_, m)| m == member);
        if let Some(idx) = existed {
            zset.remove(idx);
        }
        let entry = (score, member.to_string());
        let pos = zset.partition_point(|e| score_cmp(e, &entry) == Ordering::Less);
        zset.insert(pos, entry);
        i64::from(existed.is_none())
    }

    fn zrem_range_by_score(&mut self, key: &str, min: f64, max: f64) -> i64 {
        let Some(zset) = self.zsets.get_mut(key) else {
            return 0;
        };
        let before = zset.len();
        zset.retain(|(score, _)| *score < min || *score > max);
        (before - zset.len()) as i64
    }

    fn zrem_range_by_rank(&mut self, key: &str, start: i64, stop: i64) -> i64 {
        let Some(zset) = self.zsets.get_mut(key) else {
            return 0;
        };
        let len = zset.len() as i64;
        if len == 0 {
            return 0;
        }
        let from = if start < 0 { len + start } else { start }.max(0);
        let to = if stop < 0 { len + stop } else { stop };
        // A stop that normalizes below zero selects nothing (Redis semantics).
        if to < 0 || from > to {
            return 0;
        }
        let to = to.min(len - 1);
        zset.drain(from as usize..=to as usize);
        to - from + 1
    }

    fn del(&mut self, key: &str) -> i64 {
        let mut removed = false;
        removed |= self.lists.remove(key).is_some();
        removed |= self.sets.remove(key).is_some();
        removed |= self.zsets.remove(key).is_some();
        removed |= self.strings.remove(key).is_some();
        i64::from(removed)
    }

    fn apply(&mut self, op: &BatchOp) -> i64 {
        match op {
            BatchOp::Lpush { key, payloads } => self.lpush(key, payloads),
            BatchOp::Rpush { key, payloads } => self.rpush(key, payloads),
            BatchOp::Sadd { key, member } => self.sadd(key, member),
            BatchOp::Zadd { key, score, member } => self.zadd(key, *score, member),
            BatchOp::ZremRangeByScore { key, min, max } => {
                self.zrem_range_by_score(key, *min, *max)
            }
            BatchOp::ZremRangeByRank { key, start, stop } => {
                self.zrem_range_by_rank(key, *start, *stop)
            }
            BatchOp::Del { key } => self.del(key),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn bpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                for key in keys {
                    if let Some(list) = inner.lists.get_mut(key) {
                        if let Some(payload) = list.pop_back() {
                            return Ok(Some((key.clone(), payload)));
                        }
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn lpush(&self, key: &str, payloads: &[String]) -> StoreResult<u64> {
        let len = self.inner.lock().lpush(key, payloads);
        self.pushed.notify_waiters();
        Ok(len as u64)
    }

    async fn rpush(&self, key: &str, payloads: &[String]) -> StoreResult<u64> {
        let len = self.inner.lock().rpush(key, payloads);
        self.pushed.notify_waiters();
        Ok(len as u64)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.inner.lock().lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().sadd(key, member) == 1)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let live = inner.strings.get(key).is_some_and(|(_, expiry)| *expiry > now);
        if live {
            return Ok(false);
        }
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().zadd(key, score, member) == 1)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(zset) = inner.zsets.get_mut(key) else {
            return Ok(false);
        };
        let before = zset.len();
        zset.retain(|(_, m)| m != member);
        Ok(zset.len() < before)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.inner.lock().zsets.get(key).map_or(0, |z| z.len() as u64))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> StoreResult<Vec<(String, f64)>> {
        let inner = self.inner.lock();
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let in_range = zset
            .iter()
            .filter(|(score, _)| *score >= min && *score <= max)
            .map(|(score, member)| (member.clone(), *score));
        let result = match limit {
            Some((offset, count)) => in_range
                .skip(offset as usize)
                .take(count as usize)
                .collect(),
            None => in_range.collect(),
        };
        Ok(result)
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<Vec<i64>> {
        let replies = {
            let mut inner = self.inner.lock();
            ops.iter().map(|op| inner.apply(op)).collect()
        };
        if ops.iter().any(|op| {
            matches!(op, BatchOp::Lpush { .. } | BatchOp::Rpush { .. })
        }) {
            self.pushed.notify_waiters();
        }
        Ok(replies)
    }
}
