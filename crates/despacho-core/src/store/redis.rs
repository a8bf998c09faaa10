use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;

use crate::error::{StoreError, StoreResult};
use crate::pool::RedisPool;
use crate::store::{BatchOp, Store};

/// `Store` implementation over a shared Redis, one pooled connection per
/// operation. Blocking pops hold their connection for the full timeout, which
/// is why the pool sizing contract reserves headroom beyond worker count.
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> StoreResult<bb8::PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

/// Format a score bound the way the wire protocol expects, mapping the
/// infinities to their symbolic forms.
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{score}")
    }
}

fn push_op(pipe: &mut redis::Pipeline, op: &BatchOp) {
    match op {
        BatchOp::Lpush { key, payloads } => {
            pipe.cmd("LPUSH").arg(key).arg(payloads);
        }
        BatchOp::Rpush { key, payloads } => {
            pipe.cmd("RPUSH").arg(key).arg(payloads);
        }
        BatchOp::Sadd { key, member } => {
            pipe.cmd("SADD").arg(key).arg(member);
        }
        BatchOp::Zadd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(score_arg(*score)).arg(member);
        }
        BatchOp::ZremRangeByScore { key, min, max } => {
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(score_arg(*min))
                .arg(score_arg(*max));
        }
        BatchOp::ZremRangeByRank { key, start, stop } => {
            pipe.cmd("ZREMRANGEBYRANK").arg(key).arg(*start).arg(*stop);
        }
        BatchOp::Del { key } => {
            pipe.cmd("DEL").arg(key);
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn bpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("BRPOP");
        for key in keys {
            cmd.arg(key);
        }
        cmd.arg(timeout.as_secs_f64());
        let reply: Option<(String, String)> = cmd.query_async(&mut *conn).await?;
        Ok(reply)
    }

    async fn lpush(&self, key: &str, payloads: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(payloads)
            .query_async(&mut *conn)
            .await?;
        Ok(len)
    }

    async fn rpush(&self, key: &str, payloads: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(payloads)
            .query_async(&mut *conn)
            .await?;
        Ok(len)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("LLEN").arg(key).query_async(&mut *conn).await?;
        Ok(len)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(added == 1)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(members)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score_arg(score))
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(added == 1)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(removed == 1)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let card: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut *conn).await?;
        Ok(card)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> StoreResult<Vec<(String, f64)>> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key).arg(score_arg(min)).arg(score_arg(max)).arg("WITHSCORES");
        if let Some((offset, count)) = limit {
            cmd.arg("LIMIT").arg(offset).arg(count);
        }
        let pairs: Vec<(String, f64)> = cmd.query_async(&mut *conn).await?;
        Ok(pairs)
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<Vec<i64>> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            push_op(&mut pipe, op);
        }
        let replies: Vec<i64> = pipe.query_async(&mut *conn).await?;
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_arg_formats_bounds() {
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(15.5), "15.5");
    }
}
