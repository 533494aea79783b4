pub mod deployments;
pub mod gpu_jobs;
pub mod health;
pub mod policies;

use axum::Router;

use crate::state::AppState;

/// All routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/gpu-jobs", gpu_jobs::router())
        .nest("/deployments", deployments::router())
        .nest("/tenant-gpu-policies", policies::router())
}
