//! Handlers for the `/gpu-jobs` resource.
//!
//! Submission validates the request, enforces the tenant's queue quota, and
//! publishes an informational `enqueued` event. All reads are scoped to the
//! caller's tenancy.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use modelops_core::error::CoreError;
use modelops_db::models::gpu_job::{GpuJobListQuery, SubmitGpuJob};
use modelops_db::models::status::{GpuPoolRequest, IsolationLevel};
use modelops_db::repositories::{GpuJobRepo, TenantPolicyRepo};
use modelops_events::messages::EnqueuedMessage;
use modelops_events::{Event, Subject};

use crate::error::{AppError, AppResult};
use crate::middleware::tenancy::TenancyContext;
use crate::response::ItemsResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/gpu-jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitGpuJobRequest {
    pub target_url: Option<String>,
    pub request_json: Option<Value>,
    pub gpu_pool_requested: Option<String>,
    pub isolation_level: Option<String>,
    pub priority: Option<i64>,
}

/// POST /api/v1/gpu-jobs
///
/// Validate, enforce `max_queued_jobs`, insert as `QUEUED`, and publish
/// `enqueued`. Returns 201 with the created job.
pub async fn submit_gpu_job(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Json(input): Json<SubmitGpuJobRequest>,
) -> AppResult<impl IntoResponse> {
    let target_url = input
        .target_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| AppError::validation("target_url is required"))?;

    let request_json = input
        .request_json
        .filter(Value::is_object)
        .ok_or_else(|| AppError::validation("request_json must be a JSON object"))?;

    let gpu_pool_requested = match &input.gpu_pool_requested {
        None => GpuPoolRequest::T4,
        Some(raw) => GpuPoolRequest::parse(raw)
            .ok_or_else(|| AppError::validation("gpu_pool_requested must be t4, mig, or auto"))?,
    };

    let isolation_level = match &input.isolation_level {
        None => IsolationLevel::Shared,
        Some(raw) => IsolationLevel::parse(raw)
            .ok_or_else(|| AppError::validation("isolation_level must be shared or exclusive"))?,
    };

    let priority = i32::try_from(input.priority.unwrap_or(0))
        .map_err(|_| AppError::validation("priority is out of range"))?;

    let max_queued = TenantPolicyRepo::max_queued_jobs(&state.pool, tenancy.tenant_id).await?;
    let queued = GpuJobRepo::count_queued(&state.pool, tenancy.tenant_id).await?;
    if queued >= i64::from(max_queued) {
        return Err(AppError::Core(CoreError::QuotaExceeded(
            "GPU queue limit exceeded for tenant".to_string(),
        )));
    }

    let job = GpuJobRepo::submit(
        &state.pool,
        tenancy.tenant_id,
        tenancy.project_id,
        &tenancy.user_id,
        &SubmitGpuJob {
            gpu_pool_requested,
            isolation_level,
            priority,
            target_url,
            request_json,
        },
    )
    .await?;

    state.bus.publish(Event::from_message(
        Subject::Enqueued,
        &EnqueuedMessage {
            tenant_id: job.tenant_id,
            project_id: job.project_id,
            job_id: job.id,
            gpu_pool_requested: job.gpu_pool_requested.as_str().to_string(),
            isolation_level: job.isolation_level.as_str().to_string(),
            priority: job.priority,
        },
    ));

    tracing::info!(
        job_id = %job.id,
        tenant_id = %job.tenant_id,
        pool = job.gpu_pool_requested.as_str(),
        isolation = job.isolation_level.as_str(),
        priority = job.priority,
        "GPU job queued",
    );

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/gpu-jobs
pub async fn list_gpu_jobs(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Query(params): Query<GpuJobListQuery>,
) -> AppResult<impl IntoResponse> {
    let items = GpuJobRepo::list_scoped(
        &state.pool,
        tenancy.tenant_id,
        tenancy.project_id,
        params.limit,
    )
    .await?;
    Ok(Json(ItemsResponse { items }))
}

/// GET /api/v1/gpu-jobs/{id}
///
/// Jobs outside the caller's tenancy scope are indistinguishable from
/// missing ones.
pub async fn get_gpu_job(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let job = GpuJobRepo::find_scoped(&state.pool, tenancy.tenant_id, tenancy.project_id, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "GpuJob",
            id: job_id,
        }))?;
    Ok(Json(job))
}
