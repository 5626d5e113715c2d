use std::sync::Arc;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the pool is reference-counted and the config is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job store connection pool.
    pub pool: trainq_db::DbPool,
    /// Server configuration (read by the auth middleware).
    pub config: Arc<ServerConfig>,
}
