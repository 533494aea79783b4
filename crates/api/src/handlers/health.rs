//! Health check handler. Tenancy-exempt via the skip-path list.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_healthy = modelops_db::health_check(&state.pool).await.is_ok();
    Json(json!({
        "ok": db_healthy,
        "service": "modelops-api",
        "db_healthy": db_healthy,
    }))
}
