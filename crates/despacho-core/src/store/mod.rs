pub mod keys;
mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// One command in an atomic batch. The whole batch executes as a single unit
/// and yields one integer reply per command.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Lpush { key: String, payloads: Vec<String> },
    Rpush { key: String, payloads: Vec<String> },
    Sadd { key: String, member: String },
    Zadd { key: String, score: f64, member: String },
    ZremRangeByScore { key: String, min: f64, max: f64 },
    ZremRangeByRank { key: String, start: i64, stop: i64 },
    Del { key: String },
}

/// Thin adapter over the shared store, exposing exactly the atomic
/// primitives the engine needs. Implementations must be thread-safe; every
/// method checks a connection out for the duration of that one operation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Blocking pop across several list keys, first non-empty wins. Returns
    /// `(key, payload)` or `None` once the timeout elapses; a timeout is
    /// "no work now", not an error.
    async fn bpop(&self, keys: &[String], timeout: Duration)
        -> StoreResult<Option<(String, String)>>;

    /// Append payloads to the fetch-last end of a list.
    async fn lpush(&self, key: &str, payloads: &[String]) -> StoreResult<u64>;

    /// Append payloads to the fetch-next end of a list.
    async fn rpush(&self, key: &str, payloads: &[String]) -> StoreResult<u64>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;

    /// Returns true when the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Set `key` to `value` only if absent, with a time-to-live. Returns true
    /// when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Returns true when the member was newly added (not rescored).
    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<bool>;

    /// Returns true when the member existed and was removed.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Ordered `(member, score)` pairs with scores in `[min, max]`;
    /// `limit` is an `(offset, count)` window.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> StoreResult<Vec<(String, f64)>>;

    /// Execute the batch atomically, returning one integer reply per op.
    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<Vec<i64>>;
}
