use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::job::RetryPolicy;

/// What a handler's `perform` may fail with. Handler errors are user errors,
/// not engine errors; they feed the retry machinery rather than a typed
/// engine variant.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Per-execution context, passed explicitly through the server middleware
/// chain and into the handler instead of living in process-global state.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub jid: String,
    pub queue: String,
    pub class: String,
}

/// A job-capable type. Implementations are registered once at startup under
/// a stable class name; the declared options feed the client's defaulting.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, args: &[Value], ctx: &JobContext) -> HandlerResult;

    /// Default queue for jobs of this class when the push names none.
    fn queue(&self) -> Option<&str> {
        None
    }

    /// Default retry policy for jobs of this class.
    fn retry(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

/// Capability registry mapping a class name to its handler. Push-side
/// validation and execution-side lookup both go through here, and an identifier
/// with no entry is rejected with a distinct error at either end.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: impl Into<String>, handler: impl JobHandler + 'static) {
        self.handlers.insert(class.into(), Arc::new(handler));
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(class).cloned()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.handlers.contains_key(class)
    }
}
