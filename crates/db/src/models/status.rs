//! Status and pool enums mapping to TEXT columns.
//!
//! Every enum maps to the wire-level string stored in the database, so SQL
//! binds take the enum directly and no magic strings leak into queries.

use serde::{Deserialize, Serialize};

/// GPU job lifecycle status. Advances only along
/// `QUEUED -> DISPATCHED -> RUNNING -> {SUCCEEDED, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Dispatched,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Dispatched => "DISPATCHED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Logical GPU capacity group a job may request. `Auto` is resolved to a
/// concrete pool by the scheduler and never appears in `gpu_pool_assigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GpuPoolRequest {
    T4,
    Mig,
    Auto,
}

impl GpuPoolRequest {
    /// Parse a client-supplied pool name.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "t4" => Some(GpuPoolRequest::T4),
            "mig" => Some(GpuPoolRequest::Mig),
            "auto" => Some(GpuPoolRequest::Auto),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GpuPoolRequest::T4 => "t4",
            GpuPoolRequest::Mig => "mig",
            GpuPoolRequest::Auto => "auto",
        }
    }
}

/// A concrete GPU pool, assigned at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GpuPool {
    T4,
    Mig,
}

impl GpuPool {
    pub fn as_str(self) -> &'static str {
        match self {
            GpuPool::T4 => "t4",
            GpuPool::Mig => "mig",
        }
    }
}

/// Isolation level on the time-sliced T4 pool.
///
/// `exclusive` requests soft exclusivity: no shared jobs run concurrently
/// while an exclusive job is in flight, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum IsolationLevel {
    Shared,
    Exclusive,
}

impl IsolationLevel {
    /// Parse a client-supplied isolation level. `isolated` is accepted as a
    /// backward-compatible alias for `exclusive`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "shared" => Some(IsolationLevel::Shared),
            "exclusive" | "isolated" => Some(IsolationLevel::Exclusive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::Shared => "shared",
            IsolationLevel::Exclusive => "exclusive",
        }
    }
}

/// Serving endpoint intent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    Creating,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl EndpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointStatus::Creating => "CREATING",
            EndpointStatus::Ready => "READY",
            EndpointStatus::Failed => "FAILED",
            EndpointStatus::Deleting => "DELETING",
            EndpointStatus::Deleted => "DELETED",
        }
    }
}
