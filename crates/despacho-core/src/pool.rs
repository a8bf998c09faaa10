use std::time::Duration;

use bb8_redis::RedisConnectionManager;
use tracing::info;

use crate::config::RedisConfig;
use crate::error::{ConfigError, PoolError, StoreError};

pub type RedisPool = bb8::Pool<RedisConnectionManager>;

/// Environment hint for client-only processes embedded in a threaded host.
const THREAD_HINT_VAR: &str = "DESPACHO_MAX_THREADS";

/// Resolve the pool size. Worker processes need a connection per processor
/// plus headroom for the blocking fetch and periodic maintenance traffic, so
/// hosting workers with fewer than `concurrency + 2` connections is a fatal
/// configuration error, not a degraded mode.
pub fn resolve_size(
    explicit: Option<u32>,
    server_concurrency: Option<usize>,
) -> Result<u32, ConfigError> {
    let size = match explicit {
        Some(size) => size,
        None => match server_concurrency {
            Some(concurrency) => concurrency as u32 + 5,
            None => std::env::var(THREAD_HINT_VAR)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        },
    };

    if let Some(concurrency) = server_concurrency {
        let required = concurrency as u32 + 2;
        if size < required {
            return Err(ConfigError::PoolTooSmall { size, required });
        }
    }

    Ok(size)
}

/// Build the bounded connection pool and verify it can reach the store.
/// Pass `server_concurrency` when this process hosts workers.
pub async fn create(
    config: &RedisConfig,
    server_concurrency: Option<usize>,
) -> Result<RedisPool, PoolError> {
    let size = resolve_size(config.pool_size, server_concurrency)?;

    let manager = RedisConnectionManager::new(config.url.as_str())
        .map_err(|e| PoolError::Store(StoreError::Redis(e.to_string())))?;

    let pool = bb8::Pool::builder()
        .max_size(size)
        .connection_timeout(Duration::from_millis(config.pool_timeout_ms))
        .build(manager)
        .await
        .map_err(|e| PoolError::Store(StoreError::Pool(e.to_string())))?;

    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| PoolError::Store(StoreError::Pool(e.to_string())))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(StoreError::from)?;
    }

    info!(pool_size = size, url = %config.url, "connection pool ready");

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_size_wins() {
        assert_eq!(resolve_size(Some(30), Some(10)).unwrap(), 30);
        assert_eq!(resolve_size(Some(3), None).unwrap(), 3);
    }

    #[test]
    fn server_size_defaults_to_concurrency_plus_headroom() {
        assert_eq!(resolve_size(None, Some(25)).unwrap(), 30);
    }

    #[test]
    fn client_size_falls_back_to_fixed_default() {
        std::env::remove_var(THREAD_HINT_VAR);
        assert_eq!(resolve_size(None, None).unwrap(), 5);
    }

    #[test]
    fn undersized_worker_pool_is_fatal() {
        let err = resolve_size(Some(11), Some(10)).unwrap_err();
        match err {
            ConfigError::PoolTooSmall { size, required } => {
                assert_eq!(size, 11);
                assert_eq!(required, 12);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn concurrency_plus_two_is_accepted() {
        assert_eq!(resolve_size(Some(12), Some(10)).unwrap(), 12);
    }
}
