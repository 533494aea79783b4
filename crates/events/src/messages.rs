//! Typed payload records carried by events.
//!
//! Every payload carries the tenancy pair and the id of the entity it is
//! about; the envelope adds the publisher timestamp.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of [`Subject::Enqueued`](crate::Subject::Enqueued).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuedMessage {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub job_id: Uuid,
    pub gpu_pool_requested: String,
    pub isolation_level: String,
    pub priority: i32,
}

/// Payload of the `dispatched.*` subjects. The dispatch token gates every
/// further transition; stale tokens make redelivered events no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub job_id: Uuid,
    pub dispatch_token: Uuid,
}

/// Payload of `deploy_requested` and `delete_requested`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMessage {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub endpoint_id: Uuid,
    pub name: String,
}

/// Payload of `usage_recorded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecordedMessage {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub gpu_seconds: f64,
}
