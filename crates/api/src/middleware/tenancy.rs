//! Tenancy middleware and extractor.
//!
//! Every request outside the configured skip paths must carry the trusted
//! edge headers (`X-Tenant-Id`, `X-Project-Id`, `X-User-Id`; `X-Roles`
//! optional). The parsed [`Tenancy`] lands in request extensions for the
//! idempotency middleware and the [`TenancyContext`] handler extractor.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use modelops_core::error::CoreError;
use modelops_core::tenancy::{
    Tenancy, HEADER_PROJECT_ID, HEADER_REQUEST_ID, HEADER_ROLES, HEADER_TENANT_ID, HEADER_USER_ID,
};

use crate::error::AppError;
use crate::state::AppState;

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Validate tenancy headers and stash the [`Tenancy`] in request extensions.
pub async fn tenancy_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if state.config.tenancy.is_skipped(req.uri().path()) {
        return next.run(req).await;
    }

    let tenant_id = header_value(req.headers(), HEADER_TENANT_ID);
    let project_id = header_value(req.headers(), HEADER_PROJECT_ID);
    let user_id = header_value(req.headers(), HEADER_USER_ID);
    let roles = header_value(req.headers(), HEADER_ROLES);
    let request_id = header_value(req.headers(), HEADER_REQUEST_ID);

    let tenancy = match Tenancy::from_headers(
        tenant_id.as_deref(),
        project_id.as_deref(),
        user_id.as_deref(),
        roles.as_deref(),
        request_id.as_deref(),
    ) {
        Ok(tenancy) => tenancy,
        Err(e) => return AppError::Core(e).into_response(),
    };

    req.extensions_mut().insert(tenancy);
    next.run(req).await
}

/// Tenancy extracted from request extensions.
///
/// Use this as an extractor parameter in any handler that requires tenancy:
///
/// ```ignore
/// async fn my_handler(TenancyContext(t): TenancyContext) -> AppResult<Json<()>> {
///     tracing::info!(tenant_id = %t.tenant_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TenancyContext(pub Tenancy);

impl<S> FromRequestParts<S> for TenancyContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Tenancy>()
            .cloned()
            .map(TenancyContext)
            .ok_or_else(|| {
                AppError::Core(CoreError::TenancyDenied(
                    "Missing tenancy context".to_string(),
                ))
            })
    }
}
