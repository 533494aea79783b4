//! Serving endpoint intent models and DTOs.

use modelops_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::EndpointStatus;

/// A row from the `endpoints` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub status: EndpointStatus,
    pub url: Option<String>,
    pub error: Option<String>,
    pub runtime: String,
    pub model_version_id: Option<Uuid>,
    pub artifact_uri: Option<String>,
    pub traffic: Value,
    pub autoscaling: Value,
    pub runtime_config: Value,
    pub created_by: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for `POST /api/v1/deployments`.
#[derive(Debug, Deserialize)]
pub struct CreateEndpoint {
    pub name: String,
    pub runtime: Option<String>,
    pub model_version_id: Option<Uuid>,
    pub artifact_uri: Option<String>,
    pub traffic: Option<Value>,
    pub autoscaling: Option<Value>,
    pub runtime_config: Option<Value>,
}

/// DTO for `PATCH /api/v1/deployments/{id}`. Absent fields are untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEndpoint {
    pub name: Option<String>,
    pub runtime: Option<String>,
    pub model_version_id: Option<Uuid>,
    pub artifact_uri: Option<String>,
    pub traffic: Option<Value>,
    pub autoscaling: Option<Value>,
    pub runtime_config: Option<Value>,
}

impl UpdateEndpoint {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.runtime.is_none()
            && self.model_version_id.is_none()
            && self.artifact_uri.is_none()
            && self.traffic.is_none()
            && self.autoscaling.is_none()
            && self.runtime_config.is_none()
    }

    /// Whether the update touches a field the serving resource is rendered
    /// from, requiring a re-reconcile.
    pub fn changes_serving_fields(&self, current: &Endpoint) -> bool {
        fn differs<T: PartialEq>(new: &Option<T>, old: &T) -> bool {
            new.as_ref().is_some_and(|v| v != old)
        }

        differs(&self.runtime, &current.runtime)
            || differs(&self.traffic, &current.traffic)
            || differs(&self.autoscaling, &current.autoscaling)
            || differs(&self.runtime_config, &current.runtime_config)
            || self
                .model_version_id
                .is_some_and(|v| current.model_version_id != Some(v))
            || self
                .artifact_uri
                .as_ref()
                .is_some_and(|v| current.artifact_uri.as_ref() != Some(v))
    }
}

/// Query parameters for `GET /api/v1/deployments`.
#[derive(Debug, Deserialize)]
pub struct EndpointListQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_deleted: bool,
}
