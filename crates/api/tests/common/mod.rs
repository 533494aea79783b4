// All functions in this module are shared test helpers. Not every test binary
// uses every helper, so we suppress dead_code warnings at the item level.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use modelops_api::config::{
    AppConfig, DeployConfig, DeployMode, DispatchConfig, ExecutionMode, IdempotencyConfig,
    SchedulerConfig, ServerConfig, TenancyConfig,
};
use modelops_api::router::build_app_router;
use modelops_api::state::AppState;
use modelops_events::EventBus;

/// Fixed tenancy used by most tests.
pub const TENANT: &str = "11111111-1111-4111-8111-111111111111";
pub const PROJECT: &str = "22222222-2222-4222-8222-222222222222";
pub const USER: &str = "test-user";

/// A second tenant for cross-tenant isolation tests.
pub const OTHER_TENANT: &str = "33333333-3333-4333-8333-333333333333";

/// Build a test `AppConfig` with safe defaults and no env coupling.
pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_secs: 30,
        },
        tenancy: TenancyConfig {
            skip_paths: vec!["/healthz".to_string(), "/metrics".to_string()],
        },
        idempotency: IdempotencyConfig {
            ttl_seconds: 3600,
            max_body_bytes: 1_048_576,
            sweep_interval: Duration::from_secs(300),
        },
        scheduler: scheduler_config(8, 1, 0),
        dispatch: DispatchConfig {
            mode: ExecutionMode::Direct,
            max_deliveries: 5,
            fetch_batch: 10,
            fetch_timeout: Duration::from_millis(50),
            namespace: "mlops-system".to_string(),
            executor_image: String::new(),
            unit_ttl_seconds: 120,
            node_selector_key: "nvidia.com/device-plugin.config".to_string(),
            node_selector_value: "tesla-t4".to_string(),
            gpu_resource_name: "nvidia.com/gpu".to_string(),
            mig_resource_name: "nvidia.com/mig-1g.5gb".to_string(),
            gpu_resource_count: "1".to_string(),
            database_url: String::new(),
            executor_behavior: "simulate".to_string(),
            http_timeout_seconds: 5,
            simulate_duration_ms: 0,
        },
        deploy: deploy_config(),
    }
}

/// Scheduler settings with explicit slot caps and short timeouts.
pub fn scheduler_config(shared: i64, exclusive: i64, mig: i64) -> SchedulerConfig {
    SchedulerConfig {
        t4_shared_slots: shared,
        t4_exclusive_slots: exclusive,
        mig_total_slots: mig,
        tick_interval: Duration::from_millis(50),
        dispatch_timeout: Duration::from_secs(120),
        execution_timeout: Duration::from_secs(600),
        max_dispatch_attempts: 3,
        candidate_batch: 100,
    }
}

pub fn deploy_config() -> DeployConfig {
    DeployConfig {
        mode: DeployMode::Simulate,
        namespace: "mlops-serving".to_string(),
        name_prefix: "isvc".to_string(),
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(50),
        max_deliveries: 5,
        fetch_batch: 10,
        fetch_timeout: Duration::from_millis(50),
    }
}

/// Build the shared application state over a test pool.
pub fn build_test_state(pool: PgPool) -> AppState {
    AppState {
        pool,
        config: Arc::new(test_config()),
        bus: Arc::new(EventBus::new()),
    }
}

/// Build the full application router with all middleware layers.
///
/// Delegates to [`build_app_router`] so integration tests exercise the same
/// middleware stack (tenancy, idempotency, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_test_app(pool: PgPool) -> Router {
    build_app_router(build_test_state(pool))
}

// ---------------------------------------------------------------------------
// Shared HTTP test helpers
// ---------------------------------------------------------------------------

/// Collect the response body into raw bytes.
pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Collect the response body into a `serde_json::Value`.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Build a request carrying the standard tenancy headers for `TENANT`.
pub fn tenant_request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    scoped_request(method, uri, body, TENANT, &[])
}

/// Build a request for an arbitrary tenant, with extra headers appended.
pub fn scoped_request(
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
    tenant: &str,
    extra_headers: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-tenant-id", tenant)
        .header("x-project-id", PROJECT)
        .header("x-user-id", USER);
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

/// Send a request through the router.
pub async fn send(app: Router, request: Request<Body>) -> axum::response::Response {
    app.oneshot(request).await.unwrap()
}

/// GET with tenancy headers.
pub async fn get(app: Router, uri: &str) -> axum::response::Response {
    send(app, tenant_request(Method::GET, uri, None)).await
}

/// POST JSON with tenancy headers.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    send(app, tenant_request(Method::POST, uri, Some(body))).await
}

/// Assert an error response shape `{ "code": ... }` with the given status.
pub async fn assert_error(
    response: axum::response::Response,
    status: StatusCode,
    code: &str,
) -> serde_json::Value {
    assert_eq!(response.status(), status);
    let json = body_json(response).await;
    assert_eq!(json["code"], code, "unexpected error body: {json}");
    json
}
