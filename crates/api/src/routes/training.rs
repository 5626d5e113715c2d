//! Route definitions for the training queue.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::training;
use crate::state::AppState;

/// Queue routes, mounted at the root.
///
/// ```text
/// POST   /train           -> submit_job
/// GET    /status/{id}     -> get_status
/// GET    /result/{id}     -> get_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/train", post(training::submit_job))
        .route("/status/{id}", get(training::get_status))
        .route("/result/{id}", get(training::get_result))
}
