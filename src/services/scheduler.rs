use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::services::job_registry::JobRegistry;

/// Periodically drops finished jobs from the registry so their ids stop
/// resolving after `ttl`.
pub struct JobReaper {
    registry: Arc<JobRegistry>,
    ttl: Duration,
    interval: Duration,
}

impl JobReaper {
    pub fn new(registry: Arc<JobRegistry>, ttl: Duration, interval: Duration) -> Self {
        Self {
            registry,
            ttl,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Runs forever; spawn it.
    pub async fn start(self) {
        info!(
            "Starting job reaper (ttl: {:?}, interval: {:?})",
            self.ttl, self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;
            self.run_once();
        }
    }

    pub fn run_once(&self) -> usize {
        let removed = self.registry.reap(self.ttl);
        if removed > 0 {
            info!("Reaped {} finished job(s), {} left", removed, self.registry.len());
        } else {
            debug!("No finished jobs to reap");
        }
        removed
    }
}
