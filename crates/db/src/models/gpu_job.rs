//! GPU job entity models and DTOs.

use modelops_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{GpuPool, GpuPoolRequest, IsolationLevel, JobStatus};

/// A row from the `gpu_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GpuJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub created_by: String,
    pub status: JobStatus,
    pub gpu_pool_requested: GpuPoolRequest,
    pub gpu_pool_assigned: Option<GpuPool>,
    pub isolation_level: IsolationLevel,
    pub priority: i32,
    pub target_url: String,
    pub request_json: Value,
    pub response_json: Option<Value>,
    pub error: Option<String>,
    #[serde(skip_serializing)]
    pub dispatch_token: Option<Uuid>,
    pub dispatch_attempts: i32,
    pub requested_at: Timestamp,
    pub dispatched_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Validated input for inserting a new job in `QUEUED`.
#[derive(Debug, Clone)]
pub struct SubmitGpuJob {
    pub gpu_pool_requested: GpuPoolRequest,
    pub isolation_level: IsolationLevel,
    pub priority: i32,
    pub target_url: String,
    pub request_json: Value,
}

/// One queued job as seen by the scheduler, joined with the owning tenant's
/// policy so admission checks need no further queries.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedCandidate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub gpu_pool_requested: GpuPoolRequest,
    pub isolation_level: IsolationLevel,
    pub effective_priority: i32,
    pub t4_max_concurrency: i32,
    pub mig_max_concurrency: i32,
}

/// In-flight (DISPATCHED or RUNNING) counts grouped by tenant, pool, and
/// isolation. One row per non-empty group.
#[derive(Debug, Clone, FromRow)]
pub struct InFlightCount {
    pub tenant_id: Uuid,
    pub gpu_pool_assigned: GpuPool,
    pub isolation_level: IsolationLevel,
    pub count: i64,
}

/// The fields an executor needs after winning the `DISPATCHED -> RUNNING`
/// conditional update.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub created_by: String,
    pub gpu_pool_assigned: GpuPool,
    pub isolation_level: IsolationLevel,
    pub target_url: String,
    pub request_json: Value,
}

/// Timestamps returned by a terminal transition, used for metering.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct JobTimestamps {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

/// Query parameters for `GET /api/v1/gpu-jobs`.
#[derive(Debug, Deserialize)]
pub struct GpuJobListQuery {
    /// Maximum number of results. Defaults to 50, clamped to 1..=200.
    pub limit: Option<i64>,
}
