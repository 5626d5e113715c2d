//! Background job dispatcher.
//!
//! Polls for the oldest pending job every `poll_interval`, runs its tasks
//! through the injected [`Trainable`] one job at a time, and records
//! progress, the trained model or the failure.
//!
//! Nothing in the store claims a job, so exactly one dispatcher may run
//! against a given database. Starting a second one will execute jobs twice.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use trainq_core::serialization::{digest, ModelDocument};
use trainq_core::training::{describe_failure, Trainable, TrainingError, TrainingRequest};
use trainq_core::types::{STATUS_COMPLETE, STATUS_FAILED, STATUS_PENDING};
use trainq_db::models::job::{JobOutcome, PendingJob, Task};
use trainq_db::repositories::JobRepo;
use trainq_db::DbPool;

use crate::progress::{StatusReporter, DEFAULT_PROGRESS_INTERVAL};

/// Default polling interval for the dispatcher loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for the retry delay after store errors.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Attempts at writing a job's final status and result.
const OUTCOME_WRITE_ATTEMPTS: u32 = 5;

/// Why a task produced no model.
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    #[error("task {task_id} checksum mismatch: stored {expected}, computed {actual}")]
    ChecksumMismatch {
        task_id: i64,
        expected: String,
        actual: String,
    },

    #[error("task {task_id} is not a valid training request: {reason}")]
    InvalidRequest { task_id: i64, reason: String },

    #[error("training failed")]
    Training(#[from] TrainingError),

    #[error("training was aborted: {0}")]
    Aborted(String),
}

/// Single-worker consumer of the job queue.
pub struct JobDispatcher {
    pool: DbPool,
    trainer: Arc<dyn Trainable>,
    poll_interval: Duration,
    progress_interval: Duration,
}

impl JobDispatcher {
    /// Create a dispatcher with the default 1-second poll interval and
    /// 500 ms progress interval.
    pub fn new(pool: DbPool, trainer: Arc<dyn Trainable>) -> Self {
        Self {
            pool,
            trainer,
            poll_interval: DEFAULT_POLL_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Minimum spacing between status writes while a job is running.
    pub fn with_progress_interval(mut self, progress_interval: Duration) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    ///
    /// An empty queue sleeps for the poll interval. Store errors back off
    /// exponentially up to 30 seconds; the loop itself never exits on error.
    /// Cancellation is observed between jobs, not during one.
    ///
    /// Once training ends, the final status and result are written up to
    /// five times with backoff. If every attempt fails the job is left
    /// unfinished, and the next cycle trains it again from scratch.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            progress_interval_ms = self.progress_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        let mut backoff = self.poll_interval;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(true) => {
                    backoff = self.poll_interval;
                    continue;
                }
                Ok(false) => {
                    backoff = self.poll_interval;
                    tracing::trace!("Job queue empty");
                    self.poll_interval
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Dispatch cycle failed",
                    );
                    let delay = backoff;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Job dispatcher shutting down");
    }

    /// Process the oldest pending job, if any, to completion.
    ///
    /// Returns `Ok(true)` if a job was executed. Training failures are
    /// recorded on the job and are not errors here; only store failures are.
    pub async fn run_once(&self) -> Result<bool, sqlx::Error> {
        let Some(pending) = JobRepo::next_pending_job(&self.pool).await? else {
            return Ok(false);
        };

        self.process(pending).await?;
        Ok(true)
    }

    async fn process(&self, pending: PendingJob) -> Result<(), sqlx::Error> {
        let job_id = pending.job.id;
        let task_count = pending.tasks.len();
        let started = Instant::now();
        tracing::info!(job_id = %job_id, task_count, "Job started");

        let mut outcome = Err(TaskFailure::Aborted("no task ran".into()));
        for (index, task) in pending.tasks.iter().enumerate() {
            tracing::info!(job_id = %job_id, task_id = task.id, index, "Task started");
            outcome = self.run_task(&job_id, task, index, task_count).await;
            if outcome.is_err() {
                break;
            }
            tracing::info!(job_id = %job_id, task_id = task.id, "Task finished");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let recorded = match outcome {
            Ok(document) => {
                let recorded = self
                    .record_outcome(&job_id, STATUS_COMPLETE, &JobOutcome::Model(document.to_json()))
                    .await?;
                tracing::info!(job_id = %job_id, elapsed_ms, "Job finished");
                recorded
            }
            Err(failure) => {
                let description = describe_failure(&failure);
                tracing::error!(
                    job_id = %job_id,
                    elapsed_ms,
                    error = %description,
                    "Job failed",
                );
                self.record_outcome(&job_id, STATUS_FAILED, &JobOutcome::Failure(description))
                    .await?
            }
        };

        if !recorded {
            tracing::warn!(job_id = %job_id, "Job was already finished or removed, result dropped");
        }
        Ok(())
    }

    /// Write the final status and result, retrying store errors in place so
    /// a transient failure does not send the job back through training.
    async fn record_outcome(
        &self,
        job_id: &str,
        status: f64,
        outcome: &JobOutcome,
    ) -> Result<bool, sqlx::Error> {
        let mut delay = self.poll_interval;
        let mut attempt = 1;
        loop {
            let written = match JobRepo::update_status(&self.pool, job_id, status).await {
                Ok(_) => JobRepo::finish_job(&self.pool, job_id, outcome).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(recorded) => return Ok(recorded),
                Err(e) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        job_id,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to record job outcome, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Verify, decode and train one task, streaming its progress to the store.
    async fn run_task(
        &self,
        job_id: &str,
        task: &Task,
        index: usize,
        task_count: usize,
    ) -> Result<ModelDocument, TaskFailure> {
        let actual = digest(&task.training_job);
        if actual != task.checksum {
            return Err(TaskFailure::ChecksumMismatch {
                task_id: task.id,
                expected: task.checksum.clone(),
                actual,
            });
        }

        let request: TrainingRequest =
            serde_json::from_slice(&task.training_job).map_err(|e| TaskFailure::InvalidRequest {
                task_id: task.id,
                reason: e.to_string(),
            })?;
        request.check().map_err(|e| TaskFailure::InvalidRequest {
            task_id: task.id,
            reason: e.to_string(),
        })?;

        let (tx, mut rx) = watch::channel(STATUS_PENDING);
        let reporter = StatusReporter::new(
            tx,
            request.samples_per_epoch(),
            u64::try_from(request.epochs).unwrap_or(0),
            self.progress_interval,
        );
        let trainer = Arc::clone(&self.trainer);
        let mut handle = tokio::task::spawn_blocking(move || {
            let mut reporter = reporter;
            trainer.train(&request, &mut reporter)
        });

        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Reporter dropped: the trainer has returned.
                        break (&mut handle).await;
                    }
                    let task_percent = *rx.borrow_and_update();
                    let percent = (index as f64 * STATUS_COMPLETE + task_percent) / task_count as f64;
                    self.record_progress(job_id, percent).await;
                }
            }
        };

        match joined {
            Ok(result) => result.map_err(TaskFailure::from),
            Err(e) if e.is_panic() => Err(TrainingError::Panicked(panic_message(e.into_panic())).into()),
            Err(e) => Err(TaskFailure::Aborted(e.to_string())),
        }
    }

    async fn record_progress(&self, job_id: &str, percent: f64) {
        match JobRepo::update_status(&self.pool, job_id, percent).await {
            Ok(true) => tracing::debug!(job_id, percent, "Job progress"),
            Ok(false) => tracing::warn!(job_id, "Progress for unknown job ignored"),
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to record job progress"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
