//! Persisted key layout. The names are part of the compatibility surface:
//! external tooling inspects these keys directly.

/// Set of all queue names that have ever received a push.
pub const QUEUES_SET: &str = "queues";

/// Sorted set of jobs deferred to a future time.
pub const SCHEDULE_SET: &str = "schedule";

/// Sorted set of failed jobs awaiting their next attempt.
pub const RETRY_SET: &str = "retry";

/// Sorted set of terminally failed jobs.
pub const DEAD_SET: &str = "dead";

const QUEUE_PREFIX: &str = "queue:";

/// List key holding a queue's pending payloads.
pub fn queue_key(name: &str) -> String {
    format!("{QUEUE_PREFIX}{name}")
}

/// Bare queue name from a list key; returns the input unchanged if it does
/// not carry the prefix.
pub fn queue_name(key: &str) -> &str {
    key.strip_prefix(QUEUE_PREFIX).unwrap_or(key)
}
