//! Handlers for job submission, status polling and result retrieval.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use trainq_core::error::CoreError;
use trainq_core::job_id::is_well_formed;
use trainq_core::training::TrainingRequest;
use trainq_db::models::job::{JobStatus, ResultKind};
use trainq_db::repositories::JobRepo;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

fn job_not_found(job_id: String) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: job_id,
    })
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /train
///
/// Validate a training request and enqueue it. Returns 200 with the job id
/// as plain text. A body that is not JSON is rejected with 415, JSON that
/// does not match the request schema with 400.
pub async fn submit_job(State(state): State<AppState>, body: Bytes) -> AppResult<impl IntoResponse> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidJson(format!("Request body is not JSON: {e}")))?;
    let request = TrainingRequest::from_json_value(value)?;

    let job_id = JobRepo::create(&state.pool, &body).await?;

    tracing::info!(
        job_id = %job_id,
        epochs = request.epochs,
        batch_size = request.batch_size,
        payload_bytes = body.len(),
        "Job submitted",
    );

    Ok((StatusCode::OK, job_id))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /status/{id}
///
/// Returns `{"status": <percent>, "finished": <bool>}`; a failed job reports
/// status -1.
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobStatus>> {
    if !is_well_formed(&job_id) {
        return Err(job_not_found(job_id));
    }
    JobRepo::get_status(&state.pool, &job_id)
        .await?
        .map(Json)
        .ok_or_else(|| job_not_found(job_id))
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// GET /result/{id}
///
/// Returns the stored result verbatim: a model document as JSON or a
/// failure description as plain text. 404 while the job is unfinished.
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !is_well_formed(&job_id) {
        return Err(job_not_found(job_id));
    }
    let result = JobRepo::get_result(&state.pool, &job_id)
        .await?
        .ok_or_else(|| job_not_found(job_id))?;

    let content_type = match result.kind {
        ResultKind::Model => "application/json",
        ResultKind::Failure => "text/plain; charset=utf-8",
    };
    Ok(([(CONTENT_TYPE, content_type)], result.body))
}
