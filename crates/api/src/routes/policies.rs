//! Route definitions for tenant GPU policies.

use axum::routing::{get, put};
use axum::Router;

use crate::handlers::policies;
use crate::state::AppState;

/// Routes mounted at `/tenant-gpu-policies`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(policies::list_policies))
        .route("/{tenant_id}", put(policies::upsert_policy))
}
