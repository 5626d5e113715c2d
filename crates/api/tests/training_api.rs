//! End-to-end tests for submit, status and result over the HTTP API.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{body_json, body_text, get, post_body, post_json};
use serde_json::json;
use trainq_api::config::ServerConfig;
use trainq_core::job_id::generate_job_id;
use trainq_core::serialization::{decode_model, encode_array, ArrayData, ModelDocument, NdArray};
use trainq_db::DbPool;
use trainq_worker::{JobDispatcher, LinearRegressionTrainer};

fn training_request(optimizer: &str) -> serde_json::Value {
    let xs: Vec<f32> = (0..6).map(|i| i as f32).collect();
    let ys: Vec<f32> = xs.iter().map(|x| 0.5 * x + 1.0).collect();
    let x = NdArray::new(vec![6, 1], ArrayData::F32(xs)).unwrap();
    let y = NdArray::new(vec![6, 1], ArrayData::F32(ys)).unwrap();
    let kernel = NdArray::new(vec![1, 1], ArrayData::F32(vec![0.1])).unwrap();
    let bias = NdArray::new(vec![1], ArrayData::F32(vec![0.0])).unwrap();
    json!({
        "architecture": "{\"class_name\": \"Sequential\"}",
        "weights": [encode_array(&kernel), encode_array(&bias)],
        "loss": "mean_squared_error",
        "optimizer": optimizer,
        "x_train": encode_array(&x),
        "y_train": encode_array(&y),
        "x_train_shape": [6, 1],
        "y_train_shape": [6, 1],
        "epochs": 3,
        "batch_size": 2
    })
}

/// A valid single-feature request with `rows` f64 samples.
fn dataset_request(rows: usize) -> serde_json::Value {
    let xs: Vec<f64> = (0..rows).map(|i| i as f64).collect();
    let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
    let x = NdArray::new(vec![rows, 1], ArrayData::F64(xs)).unwrap();
    let y = NdArray::new(vec![rows, 1], ArrayData::F64(ys)).unwrap();
    let kernel = NdArray::new(vec![1, 1], ArrayData::F64(vec![0.0])).unwrap();
    let bias = NdArray::new(vec![1], ArrayData::F64(vec![0.0])).unwrap();
    json!({
        "architecture": "{\"class_name\": \"Sequential\"}",
        "weights": [encode_array(&kernel), encode_array(&bias)],
        "loss": "mean_squared_error",
        "optimizer": "sgd",
        "x_train": encode_array(&x),
        "y_train": encode_array(&y),
        "x_train_shape": [rows, 1],
        "y_train_shape": [rows, 1],
        "epochs": 1,
        "batch_size": 1024
    })
}

async fn run_next_job(pool: &DbPool) {
    let processed = JobDispatcher::new(pool.clone(), Arc::new(LinearRegressionTrainer))
        .run_once()
        .await
        .unwrap();
    assert!(processed, "expected a pending job");
}

// ---------------------------------------------------------------------------
// Submit -> poll -> fetch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_job_trains_and_returns_model() {
    let pool = common::test_pool().await;
    let app = common::build_test_app(pool.clone());

    let response = post_json(app.clone(), "/train", &training_request("sgd")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job_id = body_text(response).await;
    assert_eq!(job_id.len(), 32);

    let status = body_json(get(app.clone(), &format!("/status/{job_id}")).await).await;
    assert_eq!(status, json!({"status": 0.0, "finished": false}));

    let response = get(app.clone(), &format!("/result/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND, "no result before finishing");

    run_next_job(&pool).await;

    let status = body_json(get(app.clone(), &format!("/status/{job_id}")).await).await;
    assert_eq!(status, json!({"status": 100.0, "finished": true}));

    let response = get(app, &format!("/result/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    let document = ModelDocument::from_json(&body_text(response).await).unwrap();
    let (architecture, weights) = decode_model(&document).unwrap();
    assert_eq!(architecture, "{\"class_name\": \"Sequential\"}");
    assert_eq!(weights.len(), 2);
    assert_eq!(weights[0].shape(), &[1, 1]);
}

// ---------------------------------------------------------------------------
// Large payloads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multi_megabyte_dataset_is_accepted() {
    let pool = common::test_pool().await;
    let app = common::build_test_app(pool.clone());

    let body = dataset_request(300_000);
    assert!(body.to_string().len() > 2 * 1024 * 1024);

    let response = post_json(app, "/train", &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job_id = body_text(response).await;
    assert_eq!(job_id.len(), 32);

    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(jobs, 1);
}

#[tokio::test]
async fn body_over_configured_limit_is_rejected_with_413() {
    let config = ServerConfig {
        max_body_bytes: 64 * 1024,
        ..common::test_config()
    };
    let app = common::build_app_with_config(common::test_pool().await, config);

    let response = post_json(app, "/train", &dataset_request(10_000)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// ---------------------------------------------------------------------------
// Bad requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_object_is_rejected_with_400() {
    let app = common::build_test_app(common::test_pool().await);
    let response = post_json(app, "/train", &json!({})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn non_json_body_is_rejected_with_415() {
    let app = common::build_test_app(common::test_pool().await);
    let response = post_body(app, "/train", "text/plain", "definitely not json").await;

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await["code"], "INVALID_JSON");
}

#[tokio::test]
async fn schema_violations_are_rejected_with_400() {
    let pool = common::test_pool().await;

    let mut extra = training_request("sgd");
    extra["ham"] = json!(false);
    let mut zero_batch = training_request("sgd");
    zero_batch["batch_size"] = json!(0);
    let mut wrong_type = training_request("sgd");
    wrong_type["weights"] = json!([1, 2]);

    for body in [extra, zero_batch, wrong_type, json!([1, 2, 3])] {
        let app = common::build_test_app(pool.clone());
        let response = post_json(app, "/train", &body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }

    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(jobs, 0, "rejected requests must not be enqueued");
}

// ---------------------------------------------------------------------------
// Unknown ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = common::build_test_app(common::test_pool().await);

    let response = get(app.clone(), "/status/nonexistent").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id nonexistent not found");

    let response = get(app, "/result/nonexistent").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn well_formed_id_never_inserted_returns_404() {
    let pool = common::test_pool().await;
    let app = common::build_test_app(pool.clone());
    post_json(app.clone(), "/train", &training_request("sgd")).await;
    let fresh = generate_job_id();

    let response = get(app.clone(), &format!("/status/{fresh}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], format!("Job with id {fresh} not found"));

    let response = get(app, &format!("/result/{fresh}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Training failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_training_reports_sentinel_and_diagnostic() {
    let pool = common::test_pool().await;
    let app = common::build_test_app(pool.clone());

    let response = post_json(app.clone(), "/train", &training_request("nadam")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job_id = body_text(response).await;

    run_next_job(&pool).await;

    let status = body_json(get(app.clone(), &format!("/status/{job_id}")).await).await;
    assert_eq!(status, json!({"status": -1.0, "finished": true}));

    let response = get(app, &format!("/result/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let text = body_text(response).await;
    assert!(text.contains("unsupported optimizer 'nadam'"), "{text}");
}
