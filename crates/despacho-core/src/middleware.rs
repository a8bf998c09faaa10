use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{ProcessError, PushError};
use crate::job::JobDescriptor;
use crate::store::Store;

/// Interceptor around `Client::push`. Call `next.run(job)` to proceed,
/// return without calling it to short-circuit the push (the terminal store
/// append is skipped and this interceptor's return value becomes the push
/// result), or wrap the call to add resource-scoped behavior.
#[async_trait]
pub trait ClientMiddleware: Send + Sync {
    async fn call(&self, job: JobDescriptor, next: ClientNext<'_>) -> Result<bool, PushError>;
}

/// Interceptor around job execution on the worker side.
#[async_trait]
pub trait ServerMiddleware: Send + Sync {
    async fn call(&self, job: JobDescriptor, next: ServerNext<'_>) -> Result<(), ProcessError>;
}

pub type ClientTerminal<'a> =
    Box<dyn FnOnce(JobDescriptor) -> BoxFuture<'a, Result<bool, PushError>> + Send + 'a>;
pub type ServerTerminal<'a> =
    Box<dyn FnOnce(JobDescriptor) -> BoxFuture<'a, Result<(), ProcessError>> + Send + 'a>;

macro_rules! chain {
    ($chain:ident, $next:ident, $middleware:ident, $terminal:ident, $out:ty) => {
        /// The continuation handed to each interceptor: the remaining chain
        /// entries plus the terminal action.
        pub struct $next<'a> {
            rest: &'a [Entry<dyn $middleware>],
            terminal: $terminal<'a>,
        }

        impl<'a> $next<'a> {
            pub fn run(self, job: JobDescriptor) -> BoxFuture<'a, $out> {
                Box::pin(async move {
                    match self.rest.split_first() {
                        Some((entry, rest)) => {
                            let next = $next {
                                rest,
                                terminal: self.terminal,
                            };
                            entry.middleware.call(job, next).await
                        }
                        None => (self.terminal)(job).await,
                    }
                })
            }
        }

        /// Ordered interceptor list, composed outermost-first in registration
        /// order. Positional insertion exists for ordering-sensitive entries
        /// (a uniqueness guard must run before the final network append).
        #[derive(Default)]
        pub struct $chain {
            entries: Vec<Entry<dyn $middleware>>,
        }

        impl $chain {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn add<M: $middleware + 'static>(&mut self, middleware: M) {
                self.remove(std::any::type_name::<M>());
                self.entries.push(Entry {
                    name: std::any::type_name::<M>(),
                    middleware: Arc::new(middleware),
                });
            }

            pub fn prepend<M: $middleware + 'static>(&mut self, middleware: M) {
                self.remove(std::any::type_name::<M>());
                self.entries.insert(
                    0,
                    Entry {
                        name: std::any::type_name::<M>(),
                        middleware: Arc::new(middleware),
                    },
                );
            }

            pub fn insert_before<M: $middleware + 'static>(
                &mut self,
                anchor: &str,
                middleware: M,
            ) {
                self.remove(std::any::type_name::<M>());
                let idx = self.position(anchor).unwrap_or(0);
                self.entries.insert(
                    idx,
                    Entry {
                        name: std::any::type_name::<M>(),
                        middleware: Arc::new(middleware),
                    },
                );
            }

            pub fn insert_after<M: $middleware + 'static>(
                &mut self,
                anchor: &str,
                middleware: M,
            ) {
                self.remove(std::any::type_name::<M>());
                let idx = self
                    .position(anchor)
                    .map(|i| i + 1)
                    .unwrap_or(self.entries.len());
                self.entries.insert(
                    idx,
                    Entry {
                        name: std::any::type_name::<M>(),
                        middleware: Arc::new(middleware),
                    },
                );
            }

            pub fn remove(&mut self, name: &str) {
                self.entries.retain(|e| e.name != name);
            }

            pub fn is_empty(&self) -> bool {
                self.entries.is_empty()
            }

            pub fn names(&self) -> Vec<&'static str> {
                self.entries.iter().map(|e| e.name).collect()
            }

            fn position(&self, name: &str) -> Option<usize> {
                self.entries.iter().position(|e| e.name == name)
            }

            /// Run the chain around `terminal`. With no entries this is a
            /// plain call to the terminal.
            pub fn invoke<'a>(
                &'a self,
                job: JobDescriptor,
                terminal: $terminal<'a>,
            ) -> BoxFuture<'a, $out> {
                $next {
                    rest: &self.entries,
                    terminal,
                }
                .run(job)
            }
        }
    };
}

struct Entry<M: ?Sized> {
    name: &'static str,
    middleware: Arc<M>,
}

chain!(ClientChain, ClientNext, ClientMiddleware, ClientTerminal, Result<bool, PushError>);
chain!(ServerChain, ServerNext, ServerMiddleware, ServerTerminal, Result<(), ProcessError>);

/// Client middleware that vetoes a push when an identical (class, args,
/// queue) payload was accepted within the TTL window. Uses a set-if-absent
/// guard key, so the veto is race-free across producer processes.
pub struct UniqueJobs {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl UniqueJobs {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn guard_key(job: &JobDescriptor) -> String {
        let mut hasher = DefaultHasher::new();
        job.class.hash(&mut hasher);
        job.queue_name().hash(&mut hasher);
        for arg in &job.args {
            arg.to_string().hash(&mut hasher);
        }
        format!("unique:{:016x}", hasher.finish())
    }
}

#[async_trait]
impl ClientMiddleware for UniqueJobs {
    async fn call(&self, job: JobDescriptor, next: ClientNext<'_>) -> Result<bool, PushError> {
        let key = Self::guard_key(&job);
        if !self.store.set_nx_ex(&key, &job.jid, self.ttl).await? {
            debug!(jid = %job.jid, class = %job.class, "duplicate push suppressed");
            return Ok(false);
        }
        next.run(job).await
    }
}
