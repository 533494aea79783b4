//! Handlers for the `/deployments` resource (endpoint intents).
//!
//! The API owns the intent rows; the deploy worker realizes them. Creating
//! an intent or updating a serving-relevant field publishes
//! `deploy_requested`; deletion publishes `delete_requested` and the worker
//! finishes the soft delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use modelops_core::error::CoreError;
use modelops_db::models::endpoint::{CreateEndpoint, Endpoint, EndpointListQuery, UpdateEndpoint};
use modelops_db::models::status::EndpointStatus;
use modelops_db::repositories::EndpointRepo;
use modelops_events::messages::EndpointMessage;
use modelops_events::{Event, Subject};

use crate::error::{AppError, AppResult};
use crate::middleware::tenancy::TenancyContext;
use crate::response::ItemsResponse;
use crate::state::AppState;

fn endpoint_message(endpoint: &Endpoint) -> EndpointMessage {
    EndpointMessage {
        tenant_id: endpoint.tenant_id,
        project_id: endpoint.project_id,
        endpoint_id: endpoint.id,
        name: endpoint.name.clone(),
    }
}

async fn find_scoped(
    state: &AppState,
    tenant_id: Uuid,
    project_id: Uuid,
    id: Uuid,
) -> AppResult<Endpoint> {
    EndpointRepo::find_scoped(&state.pool, tenant_id, project_id, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Deployment",
            id,
        }))
}

/// POST /api/v1/deployments
///
/// Create an endpoint intent in `CREATING` and request its first
/// reconcile. A duplicate name within the tenancy scope is a 409.
pub async fn create_deployment(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Json(input): Json<CreateEndpoint>,
) -> AppResult<impl IntoResponse> {
    if input.name.trim().is_empty() {
        return Err(AppError::validation("name is required"));
    }

    let endpoint = EndpointRepo::create(
        &state.pool,
        tenancy.tenant_id,
        tenancy.project_id,
        &tenancy.user_id,
        &input,
    )
    .await?;

    state.bus.publish(Event::from_message(
        Subject::DeployRequested,
        &endpoint_message(&endpoint),
    ));

    tracing::info!(
        endpoint_id = %endpoint.id,
        tenant_id = %endpoint.tenant_id,
        name = %endpoint.name,
        "Deployment intent created",
    );

    Ok((StatusCode::CREATED, Json(endpoint)))
}

/// GET /api/v1/deployments
pub async fn list_deployments(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Query(params): Query<EndpointListQuery>,
) -> AppResult<impl IntoResponse> {
    let items = EndpointRepo::list_scoped(
        &state.pool,
        tenancy.tenant_id,
        tenancy.project_id,
        params.limit,
        params.include_deleted,
    )
    .await?;
    Ok(Json(ItemsResponse { items }))
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let endpoint = find_scoped(&state, tenancy.tenant_id, tenancy.project_id, id).await?;
    Ok(Json(endpoint))
}

/// PATCH /api/v1/deployments/{id}
///
/// Partial update. When a serving-relevant field actually changes, the
/// intent returns to `CREATING` and `deploy_requested` is published so the
/// worker re-reconciles.
pub async fn update_deployment(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateEndpoint>,
) -> AppResult<impl IntoResponse> {
    if input.is_empty() {
        return Err(AppError::validation("No valid fields to update"));
    }

    let current = find_scoped(&state, tenancy.tenant_id, tenancy.project_id, id).await?;
    if matches!(
        current.status,
        EndpointStatus::Deleting | EndpointStatus::Deleted
    ) {
        return Err(AppError::Core(CoreError::Conflict(
            "Deployment is being deleted".to_string(),
        )));
    }

    let reconcile = input.changes_serving_fields(&current);
    let updated = EndpointRepo::update(
        &state.pool,
        tenancy.tenant_id,
        tenancy.project_id,
        id,
        &input,
        reconcile,
    )
    .await?
    .ok_or(AppError::Core(CoreError::NotFound {
        entity: "Deployment",
        id,
    }))?;

    if reconcile {
        state.bus.publish(Event::from_message(
            Subject::DeployRequested,
            &endpoint_message(&updated),
        ));
        tracing::info!(endpoint_id = %updated.id, "Serving fields changed, re-reconcile requested");
    }

    Ok(Json(updated))
}

/// DELETE /api/v1/deployments/{id}
///
/// Mark the intent `DELETING` and publish `delete_requested`; the worker
/// removes the serving resource and finishes the soft delete by renaming.
pub async fn delete_deployment(
    TenancyContext(tenancy): TenancyContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let endpoint = find_scoped(&state, tenancy.tenant_id, tenancy.project_id, id).await?;
    if endpoint.status == EndpointStatus::Deleted {
        return Err(AppError::Core(CoreError::Conflict(
            "Deployment is already deleted".to_string(),
        )));
    }

    EndpointRepo::set_status(&state.pool, endpoint.id, EndpointStatus::Deleting, None, None)
        .await?;

    state.bus.publish(Event::from_message(
        Subject::DeleteRequested,
        &endpoint_message(&endpoint),
    ));

    tracing::info!(endpoint_id = %endpoint.id, name = %endpoint.name, "Deployment deletion requested");

    Ok(Json(json!({ "ok": true })))
}
