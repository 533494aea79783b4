//! Integration tests for idempotent submission (seeded scenario: two POSTs
//! with the same `Idempotency-Key`).

mod common;

use axum::http::{Method, StatusCode};
use common::{assert_error, body_bytes, scoped_request, send, TENANT};
use serde_json::json;
use sqlx::PgPool;

fn job_body() -> serde_json::Value {
    json!({
        "target_url": "http://serving.internal/predict",
        "request_json": {"inputs": [1, 2]},
    })
}

async fn post_with_key(
    app: axum::Router,
    body: serde_json::Value,
    key: &str,
) -> axum::response::Response {
    let request = scoped_request(
        Method::POST,
        "/api/v1/gpu-jobs",
        Some(body),
        TENANT,
        &[("idempotency-key", key)],
    );
    send(app, request).await
}

async fn job_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM gpu_jobs")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "../../migrations")]
async fn replay_returns_identical_bytes_and_creates_one_job(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    let first = post_with_key(app.clone(), job_body(), "key-1").await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get("x-idempotent-replayed").is_none());
    let first_bytes = body_bytes(first).await;

    let second = post_with_key(app, job_body(), "key-1").await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        second
            .headers()
            .get("x-idempotent-replayed")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
    let second_bytes = body_bytes(second).await;

    assert_eq!(first_bytes, second_bytes, "replay must be byte-identical");
    assert_eq!(job_count(&pool).await, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn same_key_with_different_body_conflicts(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    let first = post_with_key(app.clone(), job_body(), "key-2").await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let mut divergent = job_body();
    divergent["priority"] = json!(5);
    let second = post_with_key(app, divergent, "key-2").await;
    assert_error(second, StatusCode::CONFLICT, "IDEMPOTENCY_CONFLICT").await;

    assert_eq!(job_count(&pool).await, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn distinct_keys_create_distinct_jobs(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    assert_eq!(
        post_with_key(app.clone(), job_body(), "key-a").await.status(),
        StatusCode::CREATED
    );
    assert_eq!(
        post_with_key(app, job_body(), "key-b").await.status(),
        StatusCode::CREATED
    );
    assert_eq!(job_count(&pool).await, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn posts_without_a_key_are_not_deduplicated(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    for _ in 0..2 {
        let request = scoped_request(
            Method::POST,
            "/api/v1/gpu-jobs",
            Some(job_body()),
            TENANT,
            &[],
        );
        assert_eq!(send(app.clone(), request).await.status(), StatusCode::CREATED);
    }
    assert_eq!(job_count(&pool).await, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn error_responses_replay_too(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    // A validation failure under a key snapshots the 400.
    let bad = json!({"request_json": {}});
    let first = post_with_key(app.clone(), bad.clone(), "key-err").await;
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);
    let first_bytes = body_bytes(first).await;

    let second = post_with_key(app, bad, "key-err").await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(first_bytes, body_bytes(second).await);
    assert_eq!(job_count(&pool).await, 0);
}
