use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level engine configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DespachoConfig {
    pub redis: RedisConfig,
    pub worker: WorkerSettings,
    pub sets: SetsConfig,
}

/// Store connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Explicit pool size; resolved against concurrency when absent.
    pub pool_size: Option<u32>,
    /// Checkout timeout: fail fast under exhaustion instead of blocking the
    /// whole pool.
    pub pool_timeout_ms: u64,
}

/// Worker-process settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Queue specs in `name` or `name,weight` form. A weight of N gives the
    /// queue N entries in the weighted fetch list.
    pub queues: Vec<String>,
    /// Poll queues in the listed order instead of the weighted shuffle.
    pub strict: bool,
    pub fetch_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub max_retries: u32,
    pub backtrace_lines: usize,
    pub poll_interval_average_secs: u64,
}

/// Dead-set bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SetsConfig {
    pub dead_max_jobs: u64,
    pub dead_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: None,
            pool_timeout_ms: 1_000,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 25,
            queues: vec!["default".to_string()],
            strict: false,
            fetch_timeout_secs: 2,
            shutdown_grace_secs: 25,
            max_retries: 25,
            backtrace_lines: 30,
            poll_interval_average_secs: 15,
        }
    }
}

impl Default for SetsConfig {
    fn default() -> Self {
        Self {
            dead_max_jobs: 10_000,
            dead_timeout_secs: 180 * 24 * 60 * 60,
        }
    }
}

/// Expand `name,weight` specs into the fetch list: a queue named with weight
/// N appears N times, which is what makes the weighted shuffle serve it
/// proportionally.
pub fn expand_queues(specs: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut expanded = Vec::new();
    for spec in specs {
        let (name, weight) = match spec.split_once(',') {
            Some((name, weight)) => {
                let weight: u32 = weight
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidQueue(spec.clone()))?;
                (name.trim(), weight)
            }
            None => (spec.trim(), 1),
        };
        if name.is_empty() || weight == 0 {
            return Err(ConfigError::InvalidQueue(spec.clone()));
        }
        for _ in 0..weight {
            expanded.push(name.to_string());
        }
    }
    Ok(expanded)
}
