use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{PushError, StoreError};
use crate::handler::HandlerRegistry;
use crate::job::{epoch_now, JobDescriptor};
use crate::middleware::{ClientChain, ClientTerminal};
use crate::store::{keys, BatchOp, Store};

/// Producer-side API: validates a descriptor, fills in defaults from the
/// handler's declared options, and appends it to its queue through the
/// client middleware chain.
pub struct Client {
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
    chain: ClientChain,
}

impl Client {
    pub fn new(store: Arc<dyn Store>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            chain: ClientChain::new(),
        }
    }

    /// The client middleware chain, for registering interceptors before use.
    pub fn middleware(&mut self) -> &mut ClientChain {
        &mut self.chain
    }

    /// Push a job descriptor. Returns `Ok(true)` iff the store confirmed the
    /// append; `Ok(false)` means an interceptor vetoed the push. Validation
    /// failures reject before any store interaction.
    #[tracing::instrument(skip_all, fields(class = %job.class, jid = %job.jid))]
    pub async fn push(&self, mut job: JobDescriptor) -> Result<bool, PushError> {
        if job.class.is_empty() {
            return Err(PushError::Validation("job has no handler class".to_string()));
        }
        let handler = self
            .registry
            .get(&job.class)
            .ok_or_else(|| PushError::UnknownHandler(job.class.clone()))?;

        if job.retry.is_none() {
            job.retry = Some(handler.retry());
        }
        if job.queue.is_none() {
            job.queue = Some(
                handler
                    .queue()
                    .unwrap_or(crate::job::DEFAULT_QUEUE)
                    .to_string(),
            );
        }
        if job.enqueued_at.is_none() {
            job.enqueued_at = Some(epoch_now());
        }

        let store = Arc::clone(&self.store);
        let terminal: ClientTerminal<'_> = Box::new(move |job: JobDescriptor| {
            Box::pin(async move {
                let queue = job.queue_name().to_string();
                let payload = serde_json::to_string(&job).map_err(StoreError::from)?;

                // A future `at` defers the job to the schedule set; the
                // poller moves it onto the live queue once due.
                if let Some(at) = job.at {
                    if at > epoch_now() {
                        let added = store.zadd(keys::SCHEDULE_SET, at, &payload).await?;
                        debug!(queue = %queue, at, "job deferred to schedule set");
                        return Ok(added);
                    }
                }

                // Queue registration and the append are one atomic batch: the
                // registry never names a queue whose first push failed.
                let replies = store
                    .batch(vec![
                        BatchOp::Sadd {
                            key: keys::QUEUES_SET.to_string(),
                            member: queue.clone(),
                        },
                        BatchOp::Lpush {
                            key: keys::queue_key(&queue),
                            payloads: vec![payload],
                        },
                    ])
                    .await?;
                Ok(replies.get(1).copied().unwrap_or(0) > 0)
            })
        });

        self.chain.invoke(job, terminal).await
    }

    /// Convenience push to the handler's default queue.
    pub async fn enqueue(&self, class: &str, args: Vec<Value>) -> Result<bool, PushError> {
        self.push(JobDescriptor::new(class, args)).await
    }

    /// Convenience push deferred until `at` (epoch seconds).
    pub async fn schedule(
        &self,
        class: &str,
        args: Vec<Value>,
        at: f64,
    ) -> Result<bool, PushError> {
        let mut job = JobDescriptor::new(class, args);
        job.at = Some(at);
        self.push(job).await
    }
}
