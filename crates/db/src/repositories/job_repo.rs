//! Repository for the `jobs`, `tasks` and `results` tables.
//!
//! Each method is one transaction. Timestamps are generated here rather
//! than by SQLite so they share one RFC 3339 text format, which keeps
//! `ORDER BY` and `<` comparisons on the text columns chronological.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use trainq_core::job_id::generate_job_id;
use trainq_core::serialization::digest;
use trainq_core::training::TrainingRequest;
use trainq_core::types::{JobId, Timestamp, STATUS_PENDING};

use crate::models::job::{Job, JobOutcome, JobResult, JobStatus, PendingJob, ResultKind, Task};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, creation_time, modification_time, status, finished, job_type";

/// Column list for `tasks` queries.
const TASK_COLUMNS: &str = "id, job_id, training_job, checksum";

/// Unfinished jobs that have no task and so can never run.
const TASKLESS_PENDING_QUERY: &str = "SELECT id FROM jobs \
     WHERE finished = 0 \
       AND NOT EXISTS (SELECT 1 FROM tasks WHERE tasks.job_id = jobs.id) \
     ORDER BY creation_time ASC, rowid ASC";

/// The only job type currently produced.
const JOB_TYPE_TRAIN: &str = "train";

/// Provides the queue operations for training jobs.
pub struct JobRepo;

impl JobRepo {
    /// Enqueue a training request. Returns the new job id.
    pub async fn create_job(pool: &DbPool, request: &TrainingRequest) -> Result<JobId, sqlx::Error> {
        let payload = serde_json::to_vec(request).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        Self::create(pool, &payload).await
    }

    /// Enqueue a job whose single task carries `training_job` verbatim.
    ///
    /// The job starts with status 0 and unfinished; the task's checksum is
    /// the SHA-256 of the payload.
    pub async fn create(pool: &DbPool, training_job: &[u8]) -> Result<JobId, sqlx::Error> {
        let job_id = generate_job_id();
        let checksum = digest(training_job);
        let now = Utc::now();

        let mut tx = pool.begin().await?;
        sqlx::query(
            "INSERT INTO jobs (id, creation_time, modification_time, status, finished, job_type) \
             VALUES ($1, $2, $2, $3, 0, $4)",
        )
        .bind(&job_id)
        .bind(now)
        .bind(STATUS_PENDING)
        .bind(JOB_TYPE_TRAIN)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO tasks (job_id, training_job, checksum) VALUES ($1, $2, $3)")
            .bind(&job_id)
            .bind(training_job)
            .bind(&checksum)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(job_id)
    }

    /// The oldest unfinished job and its tasks, or `None` if the queue is empty.
    ///
    /// Nothing is marked as claimed: the single-dispatcher deployment is
    /// what keeps a job from being picked up twice. Jobs without tasks are
    /// skipped with a warning so a malformed row cannot block the head of
    /// the queue.
    pub async fn next_pending_job(pool: &DbPool) -> Result<Option<PendingJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let taskless: Vec<JobId> = sqlx::query_scalar(TASKLESS_PENDING_QUERY)
            .fetch_all(&mut *tx)
            .await?;
        for job_id in &taskless {
            tracing::warn!(job_id = %job_id, "Job has no training task, skipping");
        }

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE finished = 0 \
               AND EXISTS (SELECT 1 FROM tasks WHERE tasks.job_id = jobs.id) \
             ORDER BY creation_time ASC, rowid ASC \
             LIMIT 1"
        );
        let Some(job) = sqlx::query_as::<_, Job>(&query)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY id ASC");
        let tasks = sqlx::query_as::<_, Task>(&query)
            .bind(&job.id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(PendingJob { job, tasks }))
    }

    /// Current progress of a job, or `None` if the id is unknown.
    pub async fn get_status(pool: &DbPool, job_id: &str) -> Result<Option<JobStatus>, sqlx::Error> {
        sqlx::query_as::<_, JobStatus>("SELECT status, finished FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Set a job's status and refresh its modification time.
    ///
    /// Unknown ids are a silent no-op; the return value tells whether a row
    /// was updated.
    pub async fn update_status(pool: &DbPool, job_id: &str, status: f64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $1, modification_time = $2 WHERE id = $3",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job finished and store its result in one transaction.
    ///
    /// Returns `false` without writing anything if the job is unknown or
    /// already finished, so a job never holds more than one result.
    pub async fn finish_job(
        pool: &DbPool,
        job_id: &str,
        outcome: &JobOutcome,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE jobs SET finished = 1, modification_time = $1 WHERE id = $2 AND finished = 0",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO results (job_id, result_type, result) VALUES ($1, $2, $3)")
            .bind(job_id)
            .bind(outcome.kind().as_str())
            .bind(outcome.body().as_bytes())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }

    /// The stored result, or `None` if the job is unknown or unfinished.
    pub async fn get_result(pool: &DbPool, job_id: &str) -> Result<Option<JobResult>, sqlx::Error> {
        let row: Option<(String, Vec<u8>)> =
            sqlx::query_as("SELECT result_type, result FROM results WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(pool)
                .await?;

        row.map(|(kind, body)| {
            let kind = ResultKind::parse(&kind)
                .ok_or_else(|| sqlx::Error::Decode(format!("unknown result_type '{kind}'").into()))?;
            Ok(JobResult { kind, body })
        })
        .transpose()
    }

    /// Delete finished jobs last modified before `cutoff`, with their tasks
    /// and results. Returns the number of jobs deleted.
    pub async fn purge_finished_before(pool: &DbPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE finished = 1 AND modification_time < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete finished jobs not modified within `ttl`.
    pub async fn purge_expired(pool: &DbPool, ttl: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        match cutoff {
            Some(cutoff) => Self::purge_finished_before(pool, cutoff).await,
            // A TTL reaching before the representable epoch expires nothing.
            None => Ok(0),
        }
    }
}
