//! Route definitions for the `/gpu-jobs` resource.
//!
//! All endpoints require tenancy headers; submission honors the opt-in
//! `Idempotency-Key` header.

use axum::routing::get;
use axum::Router;

use crate::handlers::gpu_jobs;
use crate::state::AppState;

/// Routes mounted at `/gpu-jobs`.
///
/// ```text
/// GET    /        -> list_gpu_jobs
/// POST   /        -> submit_gpu_job
/// GET    /{id}    -> get_gpu_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(gpu_jobs::list_gpu_jobs).post(gpu_jobs::submit_gpu_job),
        )
        .route("/{id}", get(gpu_jobs::get_gpu_job))
}
