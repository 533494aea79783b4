//! Route definition for the health check.

use axum::routing::get;
use axum::Router;

use crate::handlers::health;
use crate::state::AppState;

/// Routes mounted at the root (not under `/api/v1`), so the tenancy
/// middleware's skip-path list can match them exactly.
pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(health::healthz))
}
