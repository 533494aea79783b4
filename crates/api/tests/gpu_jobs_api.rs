//! Integration tests for the GPU jobs HTTP surface: tenancy enforcement,
//! submission validation, queue quota, and scoped reads.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{assert_error, body_json, get, post_json, scoped_request, send, OTHER_TENANT, TENANT};
use serde_json::json;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use modelops_db::models::tenant_policy::UpsertTenantGpuPolicy;
use modelops_db::repositories::TenantPolicyRepo;
use modelops_events::Subject;

fn job_body() -> serde_json::Value {
    json!({
        "target_url": "http://serving.internal/predict",
        "request_json": {"inputs": [1, 2]},
    })
}

// ---------------------------------------------------------------------------
// Tenancy
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn missing_tenancy_headers_are_denied(pool: PgPool) {
    let app = common::build_test_app(pool);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/gpu-jobs")
        .header("content-type", "application/json")
        .body(Body::from(job_body().to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_error(response, StatusCode::BAD_REQUEST, "TENANCY_DENIED").await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn malformed_tenant_uuid_is_denied(pool: PgPool) {
    let app = common::build_test_app(pool);
    let request = scoped_request(
        Method::POST,
        "/api/v1/gpu-jobs",
        Some(job_body()),
        "not-a-uuid",
        &[],
    );
    let response = send(app, request).await;
    assert_error(response, StatusCode::BAD_REQUEST, "TENANCY_DENIED").await;
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn submit_returns_201_with_the_queued_job(pool: PgPool) {
    let state = common::build_test_state(pool);
    let sub = state.bus.subscribe(Subject::Enqueued, "test");
    let app = modelops_api::router::build_app_router(state);

    let response = post_json(
        app,
        "/api/v1/gpu-jobs",
        json!({
            "target_url": "http://serving.internal/predict",
            "request_json": {"inputs": [1]},
            "gpu_pool_requested": "auto",
            "isolation_level": "isolated",
            "priority": 7,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let job = body_json(response).await;
    assert_eq!(job["status"], "QUEUED");
    assert_eq!(job["gpu_pool_requested"], "auto");
    // The legacy `isolated` alias normalizes to `exclusive`.
    assert_eq!(job["isolation_level"], "exclusive");
    assert_eq!(job["priority"], 7);
    assert_eq!(job["tenant_id"], TENANT);
    assert!(job["gpu_pool_assigned"].is_null());
    assert!(job.get("dispatch_token").is_none());

    // Submission publishes an informational `enqueued` event.
    let batch = sub.fetch(1, Duration::from_millis(100)).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].event().payload["job_id"], job["id"]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn submit_validates_fields(pool: PgPool) {
    let app = common::build_test_app(pool);

    let response = post_json(
        app.clone(),
        "/api/v1/gpu-jobs",
        json!({"request_json": {}}),
    )
    .await;
    assert_error(response, StatusCode::BAD_REQUEST, "VALIDATION_ERROR").await;

    let response = post_json(
        app.clone(),
        "/api/v1/gpu-jobs",
        json!({"target_url": "http://x", "request_json": [1, 2]}),
    )
    .await;
    assert_error(response, StatusCode::BAD_REQUEST, "VALIDATION_ERROR").await;

    let response = post_json(
        app.clone(),
        "/api/v1/gpu-jobs",
        json!({"target_url": "http://x", "request_json": {}, "gpu_pool_requested": "a100"}),
    )
    .await;
    assert_error(response, StatusCode::BAD_REQUEST, "VALIDATION_ERROR").await;

    let response = post_json(
        app,
        "/api/v1/gpu-jobs",
        json!({"target_url": "http://x", "request_json": {}, "isolation_level": "private"}),
    )
    .await;
    assert_error(response, StatusCode::BAD_REQUEST, "VALIDATION_ERROR").await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn queue_quota_is_enforced(pool: PgPool) {
    TenantPolicyRepo::upsert(
        &pool,
        TENANT.parse().unwrap(),
        &UpsertTenantGpuPolicy {
            plan: None,
            t4_max_concurrency: None,
            mig_max_concurrency: None,
            max_queued_jobs: Some(2),
            priority_boost: None,
        },
    )
    .await
    .unwrap();
    let app = common::build_test_app(pool);

    for _ in 0..2 {
        let response = post_json(app.clone(), "/api/v1/gpu-jobs", job_body()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = post_json(app, "/api/v1/gpu-jobs", job_body()).await;
    assert_error(response, StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED").await;
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn get_is_scoped_to_the_callers_tenancy(pool: PgPool) {
    let app = common::build_test_app(pool);

    let created = post_json(app.clone(), "/api/v1/gpu-jobs", job_body()).await;
    let job = body_json(created).await;
    let id = job["id"].as_str().unwrap().to_string();

    let response = get(app.clone(), &format!("/api/v1/gpu-jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"], id.as_str());
    assert_eq!(fetched["status"], "QUEUED");

    // Another tenant cannot see the job.
    let request = scoped_request(
        Method::GET,
        &format!("/api/v1/gpu-jobs/{id}"),
        None,
        OTHER_TENANT,
        &[],
    );
    let response = send(app, request).await;
    assert_error(response, StatusCode::NOT_FOUND, "NOT_FOUND").await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn unknown_job_is_404(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(app, &format!("/api/v1/gpu-jobs/{}", Uuid::new_v4())).await;
    assert_error(response, StatusCode::NOT_FOUND, "NOT_FOUND").await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_returns_the_tenants_jobs_newest_first(pool: PgPool) {
    let app = common::build_test_app(pool);
    for _ in 0..3 {
        post_json(app.clone(), "/api/v1/gpu-jobs", job_body()).await;
    }

    let response = get(app, "/api/v1/gpu-jobs?limit=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 2);
}
