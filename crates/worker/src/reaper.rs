//! Periodic purge of expired finished jobs.
//!
//! Runs on a fixed interval using `tokio::time::interval`. Only finished
//! jobs are eligible, so a job that is still running is never removed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trainq_db::repositories::JobRepo;
use trainq_db::DbPool;

/// How long a finished job stays fetchable.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(60);

/// How often the sweep runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Background sweeper deleting finished jobs older than the TTL.
pub struct Reaper {
    pool: DbPool,
    ttl: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            ttl: DEFAULT_JOB_TTL,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one purge. Returns the number of jobs deleted.
    pub async fn sweep_once(&self) -> Result<u64, sqlx::Error> {
        JobRepo::purge_expired(&self.pool, self.ttl).await
    }

    /// Sweep every interval until `cancel` is triggered.
    ///
    /// Store errors are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Job reaper started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job reaper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(deleted) if deleted > 0 => {
                            tracing::info!(deleted, "Job reaper: purged expired jobs");
                        }
                        Ok(_) => {
                            tracing::debug!("Job reaper: nothing to purge");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Job reaper: purge failed");
                        }
                    }
                }
            }
        }
    }
}
