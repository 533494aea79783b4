//! Handlers for tenant GPU policies.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use modelops_db::models::tenant_policy::UpsertTenantGpuPolicy;
use modelops_db::repositories::TenantPolicyRepo;

use crate::error::AppResult;
use crate::middleware::tenancy::TenancyContext;
use crate::response::ItemsResponse;
use crate::state::AppState;

/// GET /api/v1/tenant-gpu-policies
pub async fn list_policies(
    TenancyContext(_tenancy): TenancyContext,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let items = TenantPolicyRepo::list(&state.pool).await?;
    Ok(Json(ItemsResponse { items }))
}

/// PUT /api/v1/tenant-gpu-policies/{tenant_id}
pub async fn upsert_policy(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<UpsertTenantGpuPolicy>,
) -> AppResult<impl IntoResponse> {
    let policy = TenantPolicyRepo::upsert(&state.pool, tenant_id, &input).await?;
    tracing::info!(
        %tenant_id,
        updated_by = %tenancy.user_id,
        t4_max_concurrency = policy.t4_max_concurrency,
        mig_max_concurrency = policy.mig_max_concurrency,
        "Tenant GPU policy upserted",
    );
    Ok(Json(policy))
}
