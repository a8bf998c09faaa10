use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::job::epoch_now;
use crate::sets::JobSet;
use crate::store::Store;

/// Default average interval between sweeps.
pub const POLL_INTERVAL_AVERAGE: Duration = Duration::from_secs(15);

/// Background sweeper for the `schedule` and `retry` sets: moves entries
/// whose score has come due back onto their live queues.
///
/// Each cycle sleeps a random duration in [avg/2, 3·avg/2] so a fleet of
/// pollers started together does not hammer the store in lockstep. Sweep
/// errors are logged and the loop continues; the next cycle retries.
pub struct Poller {
    scheduled: JobSet,
    retry: JobSet,
    average_interval: Duration,
}

impl Poller {
    pub fn new(store: Arc<dyn Store>, average_interval: Duration) -> Self {
        Self {
            scheduled: JobSet::scheduled(Arc::clone(&store)),
            retry: JobSet::retry(store),
            average_interval,
        }
    }

    fn random_interval(&self) -> Duration {
        let splay: f64 = rand::rng().random();
        self.average_interval.mul_f64(0.5 + splay)
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(average_secs = self.average_interval.as_secs(), "poller started");
        loop {
            let wait = self.random_interval();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("poller stopped");
    }

    /// One sweep over both sets. Public so an external scheduler can drive
    /// sweeps on its own cadence instead of running the loop.
    pub async fn sweep_once(&self) {
        let now = epoch_now();
        for set in [&self.scheduled, &self.retry] {
            match set.sweep(now).await {
                Ok(0) => {}
                Ok(count) => info!(set = set.name(), count, "enqueued due jobs"),
                Err(e) => warn!(set = set.name(), error = %e, "sweep failed"),
            }
        }
    }
}
