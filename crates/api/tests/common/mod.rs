#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use trainq_api::config::ServerConfig;
use trainq_api::router::build_app_router;
use trainq_api::state::AppState;
use trainq_db::DbPool;

/// Build a test `ServerConfig`: loopback, no password, 30-second timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// A migrated private in-memory store.
pub async fn test_pool() -> DbPool {
    let pool = trainq_db::create_pool(trainq_db::IN_MEMORY_URL)
        .await
        .expect("in-memory pool");
    trainq_db::run_migrations(&pool).await.expect("migrations");
    pool
}

/// Build the production router over `pool` with the given config.
pub fn build_app_with_config(pool: DbPool, config: ServerConfig) -> Router {
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
    };
    build_app_router(state, &config)
}

/// Build the production router over `pool` with auth disabled.
pub fn build_test_app(pool: DbPool) -> Router {
    build_app_with_config(pool, test_config())
}

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// POST a raw body with the given content type.
pub async fn post_body(app: Router, uri: &str, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, json: &serde_json::Value) -> Response<Body> {
    post_body(app, uri, "application/json", json.to_string()).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
