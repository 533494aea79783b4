//! Per-tenant GPU admission and fairness policy.

use modelops_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `tenant_gpu_policies` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TenantGpuPolicy {
    pub tenant_id: Uuid,
    pub plan: String,
    pub t4_max_concurrency: i32,
    pub mig_max_concurrency: i32,
    pub max_queued_jobs: i32,
    pub priority_boost: i32,
    pub updated_at: Timestamp,
}

/// Implicit policy for tenants without a row (free plan).
#[derive(Debug, Clone, Copy)]
pub struct PolicyDefaults {
    pub t4_max_concurrency: i32,
    pub mig_max_concurrency: i32,
    pub max_queued_jobs: i32,
    pub priority_boost: i32,
}

pub const POLICY_DEFAULTS: PolicyDefaults = PolicyDefaults {
    t4_max_concurrency: 1,
    mig_max_concurrency: 0,
    max_queued_jobs: 50,
    priority_boost: 0,
};

/// DTO for `PUT /api/v1/tenant-gpu-policies/{tenant_id}`.
#[derive(Debug, Deserialize)]
pub struct UpsertTenantGpuPolicy {
    pub plan: Option<String>,
    pub t4_max_concurrency: Option<i32>,
    pub mig_max_concurrency: Option<i32>,
    pub max_queued_jobs: Option<i32>,
    pub priority_boost: Option<i32>,
}
