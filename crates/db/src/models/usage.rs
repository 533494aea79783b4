//! Usage ledger model.

use modelops_core::types::Timestamp;
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the append-only `usage_ledger` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageRecord {
    pub id: i64,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub subject_type: String,
    pub subject_id: Uuid,
    pub meter: String,
    pub quantity: f64,
    pub labels: Value,
    pub created_at: Timestamp,
}

/// Meter name for GPU execution time.
pub const METER_GPU_SECONDS: &str = "gpu_seconds";

/// Subject type for GPU job usage rows.
pub const SUBJECT_GPU_JOB: &str = "gpu_job";
