pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod job;
pub mod middleware;
pub mod pool;
pub mod processor;
pub mod scheduled;
pub mod sets;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use client::Client;
pub use config::DespachoConfig;
pub use error::{ConfigError, PoolError, ProcessError, PushError, StoreError, StoreResult};
pub use fetch::{BasicFetch, UnitOfWork};
pub use handler::{HandlerRegistry, HandlerResult, JobContext, JobHandler};
pub use job::{JobDescriptor, RetryPolicy};
pub use middleware::{ClientChain, ClientMiddleware, ServerChain, ServerMiddleware};
pub use processor::{Processor, RetrySettings};
pub use scheduled::Poller;
pub use sets::{DeadSet, DeadSetBounds, JobSet, SortedEntry};
pub use stats::{Stats, StatsSnapshot};
pub use store::{MemoryStore, RedisStore, Store};
pub use worker::WorkerPool;
