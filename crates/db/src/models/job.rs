//! Job entity models.

use serde::Serialize;
use sqlx::FromRow;
use trainq_core::types::{JobId, Timestamp};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub creation_time: Timestamp,
    pub modification_time: Timestamp,
    pub status: f64,
    pub finished: bool,
    pub job_type: String,
}

/// A row from the `tasks` table: one serialized training request.
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    pub id: i64,
    pub job_id: JobId,
    pub training_job: Vec<u8>,
    pub checksum: String,
}

/// An unfinished job together with the tasks it owns, in task order.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub job: Job,
    pub tasks: Vec<Task>,
}

/// Progress as exposed to pollers.
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize)]
pub struct JobStatus {
    pub status: f64,
    pub finished: bool,
}

/// What a finished job's result payload contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// A serialized model document.
    Model,
    /// Human-readable failure diagnostics.
    Failure,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Model => "model",
            ResultKind::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(ResultKind::Model),
            "failure" => Some(ResultKind::Failure),
            _ => None,
        }
    }
}

/// The terminal outcome recorded by `finish_job`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Serialized model document (JSON text).
    Model(String),
    /// Failure description.
    Failure(String),
}

impl JobOutcome {
    pub fn kind(&self) -> ResultKind {
        match self {
            JobOutcome::Model(_) => ResultKind::Model,
            JobOutcome::Failure(_) => ResultKind::Failure,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            JobOutcome::Model(body) | JobOutcome::Failure(body) => body,
        }
    }
}

/// A stored result payload.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub kind: ResultKind,
    pub body: Vec<u8>,
}
