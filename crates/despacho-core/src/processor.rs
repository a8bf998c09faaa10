use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn, Instrument};

use crate::error::ProcessError;
use crate::fetch::UnitOfWork;
use crate::handler::{HandlerRegistry, JobContext};
use crate::job::{epoch_now, JobDescriptor};
use crate::middleware::{ServerChain, ServerTerminal};
use crate::sets::{DeadSet, DeadSetBounds, JobSet};
use crate::stats::Stats;
use crate::store::Store;

/// Knobs for the failure-routing side of processing.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Attempt ceiling for jobs whose policy is a plain `true`.
    pub max_retries: u32,
    /// Captured backtrace lines kept in the descriptor's error history.
    pub backtrace_lines: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 25,
            backtrace_lines: 30,
        }
    }
}

/// Executes fetched units through the server middleware chain and routes
/// failures into the retry or dead sets.
///
/// Per unit: Idle → Fetching → Executing → Acknowledging on success, or
/// Failing with bookkeeping that always runs before the error surfaces to
/// the caller. Acknowledging needs no store interaction: the fetch already
/// consumed the list entry, ownership in flight is purely process-local.
pub struct Processor {
    registry: Arc<HandlerRegistry>,
    chain: ServerChain,
    stats: Arc<Stats>,
    retry_set: JobSet,
    dead_set: DeadSet,
    settings: RetrySettings,
}

impl Processor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<HandlerRegistry>,
        chain: ServerChain,
        stats: Arc<Stats>,
        settings: RetrySettings,
        dead_bounds: DeadSetBounds,
    ) -> Self {
        Self {
            registry,
            chain,
            stats,
            retry_set: JobSet::retry(Arc::clone(&store)),
            dead_set: DeadSet::new(store, dead_bounds),
            settings,
        }
    }

    /// Process one unit of work. On handler failure the error history and
    /// retry bookkeeping are written first, then the original error is
    /// returned so the caller's crash handling can log it. Each call moves
    /// `processed` once, plus `failed` when execution raised.
    pub async fn process(&self, unit: UnitOfWork) -> Result<(), ProcessError> {
        let job: JobDescriptor = match serde_json::from_str(&unit.payload) {
            Ok(job) => job,
            Err(e) => {
                // Retrying an undecodable payload guarantees the same
                // failure, so it goes straight to the dead set, verbatim.
                warn!(queue = %unit.queue, "undecodable payload, dead-lettering");
                self.dead_set.kill(&unit.payload, epoch_now()).await?;
                return Err(ProcessError::Deserialization(e.to_string()));
            }
        };

        let span = tracing::info_span!(
            "job",
            jid = %job.jid,
            queue = %unit.queue,
            class = %job.class
        );
        async {
            let result = self.execute(&job).await;
            self.stats.incr_processed();
            match result {
                Ok(()) => {
                    debug!("done");
                    Ok(())
                }
                Err(err) => {
                    self.stats.incr_failed();
                    self.route_failure(job, &err).await?;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &JobDescriptor) -> Result<(), ProcessError> {
        let registry = Arc::clone(&self.registry);
        let terminal: ServerTerminal<'_> = Box::new(move |job: JobDescriptor| {
            Box::pin(async move {
                let handler = registry
                    .get(&job.class)
                    .ok_or_else(|| ProcessError::UnknownHandler(job.class.clone()))?;
                let ctx = JobContext {
                    jid: job.jid.clone(),
                    queue: job.queue_name().to_string(),
                    class: job.class.clone(),
                };
                handler
                    .perform(&job.args, &ctx)
                    .await
                    .map_err(|e| ProcessError::Execution {
                        class: job.class.clone(),
                        message: e.to_string(),
                    })
            })
        });
        self.chain.invoke(job.clone(), terminal).await
    }

    /// Record the failure on the descriptor and insert it into the retry set
    /// (with backoff) or the dead set (retries disabled or exhausted).
    async fn route_failure(
        &self,
        mut job: JobDescriptor,
        err: &ProcessError,
    ) -> Result<(), ProcessError> {
        let now = epoch_now();

        job.error_class = Some(err.error_class().to_string());
        job.error_message = Some(err.to_string());
        job.error_backtrace = Some(capture_backtrace(self.settings.backtrace_lines));

        let count = match job.retry_count {
            Some(prev) => {
                job.retried_at = Some(now);
                prev + 1
            }
            None => {
                job.failed_at = Some(now);
                0
            }
        };
        job.retry_count = Some(count);

        let policy = job.retry.clone().unwrap_or_default();
        let max = policy.max_retries(self.settings.max_retries);
        let raw = serde_json::to_string(&job).map_err(crate::error::StoreError::from)?;

        if policy.enabled() && count < max {
            let at = now + retry_delay(count);
            debug!(retry_count = count, at, "scheduling retry");
            self.retry_set.add(&raw, at).await?;
        } else {
            warn!(retry_count = count, "retries exhausted, dead-lettering");
            self.dead_set.kill(&raw, now).await?;
        }
        Ok(())
    }
}

/// Exponential backoff with jitter, in seconds. The deterministic part grows
/// with the fourth power of the attempt; the jitter bound grows linearly so
/// retried herds spread out further at higher counts.
pub fn retry_delay(retry_count: u32) -> f64 {
    let base = (retry_count as f64).powi(4) + 15.0;
    let jitter = rand::rng().random_range(0..=10 * (retry_count as u64 + 1));
    base + jitter as f64
}

fn capture_backtrace(limit: usize) -> Vec<String> {
    std::backtrace::Backtrace::force_capture()
        .to_string()
        .lines()
        .take(limit)
        .map(|line| line.trim().to_string())
        .collect()
}
