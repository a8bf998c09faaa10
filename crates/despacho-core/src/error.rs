/// Low-level store errors (network, pool, serialization).
/// This is the error type for the `Store` trait; store operations can only
/// fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Fatal configuration errors, raised at startup rather than degraded into.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "connection pool of {size} is too small, need at least {required} (concurrency + 2)"
    )]
    PoolTooSmall { size: u32, required: u32 },

    #[error("invalid queue spec: {0}")]
    InvalidQueue(String),
}

/// Errors from building the connection pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by `Client::push`. Validation failures are rejected before
/// any store interaction.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("invalid job: {0}")]
    Validation(String),

    #[error("unknown handler class: {0}")]
    UnknownHandler(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by `Processor::process`. The failure-routing bookkeeping
/// has already run by the time one of these reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to decode job payload: {0}")]
    Deserialization(String),

    #[error("unknown handler class: {0}")]
    UnknownHandler(String),

    #[error("{class} failed: {message}")]
    Execution { class: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Stable error-class name recorded into the descriptor's error history.
    pub fn error_class(&self) -> &'static str {
        match self {
            ProcessError::Deserialization(_) => "SerializationError",
            ProcessError::UnknownHandler(_) => "UnknownHandlerError",
            ProcessError::Execution { .. } => "HandlerError",
            ProcessError::Store(_) => "StoreError",
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
