use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Queue used when neither the push call nor the handler names one.
pub const DEFAULT_QUEUE: &str = "default";

/// Retry policy carried on the wire as either a boolean flag or a bounded
/// attempt count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetryPolicy {
    Flag(bool),
    Limit(u32),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Flag(true)
    }
}

impl RetryPolicy {
    pub fn enabled(&self) -> bool {
        match self {
            RetryPolicy::Flag(flag) => *flag,
            RetryPolicy::Limit(n) => *n > 0,
        }
    }

    /// Maximum retry attempts under this policy, given the engine default.
    pub fn max_retries(&self, default_max: u32) -> u32 {
        match self {
            RetryPolicy::Flag(true) => default_max,
            RetryPolicy::Flag(false) => 0,
            RetryPolicy::Limit(n) => *n,
        }
    }
}

/// Job descriptor: the unit producers push and workers execute. Serialized as
/// a flat JSON object; `queue` and `retry` are filled in by the client during
/// push, the `error_*`/`retry_count` fields by the processor on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub jid: String,
    pub class: String,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_backtrace: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<f64>,
}

impl JobDescriptor {
    pub fn new(class: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            jid: new_jid(),
            class: class.into(),
            args,
            queue: None,
            retry: None,
            at: None,
            enqueued_at: None,
            error_class: None,
            error_message: None,
            error_backtrace: None,
            retry_count: None,
            failed_at: None,
            retried_at: None,
        }
    }

    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(DEFAULT_QUEUE)
    }
}

/// Generate a globally unique job id.
pub fn new_jid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current time as fractional seconds since the epoch. All sorted-set scores
/// use this representation so same-second insertions stay disambiguated.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
