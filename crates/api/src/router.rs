//! Shared application router builder.
//!
//! Provides [`build_app_router`] so both the production binary (`main.rs`)
//! and integration tests use the exact same middleware stack.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::middleware::auth::require_basic_auth;
use crate::routes;
use crate::state::AppState;

/// Build the full application [`Router`] with all middleware layers.
///
/// Queue routes sit behind basic auth; `/ping` and `/health` never do.
/// The middleware stack is applied bottom-up:
///
/// 1. Set request ID on incoming requests
/// 2. Structured request/response tracing
/// 3. Propagate request ID to response
/// 4. Request timeout
/// 5. Panic recovery (catch panics, return 500)
/// 6. Request body cap (`max_body_bytes`, `0` for none)
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let body_limit = match config.max_body_bytes {
        0 => DefaultBodyLimit::disable(),
        limit => DefaultBodyLimit::max(limit),
    };

    let queue = routes::training::router()
        .route_layer(from_fn_with_state(state.clone(), require_basic_auth));

    Router::new()
        .merge(routes::health::router())
        .merge(queue)
        // -- Middleware stack (applied bottom-up) --
        .layer(body_limit)
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
