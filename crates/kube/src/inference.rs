//! KServe `InferenceService` rendering and reconciliation.
//!
//! The serving resource is a custom resource, so it is handled through
//! `DynamicObject` with a hand-built `ApiResource`. Rendering is pure: the
//! same serving spec always yields the same manifest, which keeps
//! re-reconciles idempotent.

use std::time::Duration;

use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use serde_json::{json, Value};

use crate::{dns_safe_name, PlaneError};

pub const KSERVE_GROUP: &str = "serving.kserve.io";
pub const KSERVE_VERSION: &str = "v1beta1";
pub const KSERVE_KIND: &str = "InferenceService";
pub const KSERVE_PLURAL: &str = "inferenceservices";

/// Field manager for server-side apply.
const FIELD_MANAGER: &str = "modelops-deploy";

/// Everything needed to render one `InferenceService`, already validated by
/// the deploy worker.
#[derive(Debug, Clone)]
pub struct ServingSpec {
    pub name: String,
    pub namespace: String,
    pub tenant_id: String,
    pub project_id: String,
    pub endpoint_id: String,
    pub artifact_uri: Option<String>,
    pub model_format: String,
    pub protocol_version: Option<String>,
    pub runtime_version: Option<String>,
    /// KServe deployment mode annotation value (e.g. `Serverless`). Canary
    /// rollouts require the serverless variant.
    pub deployment_mode: Option<String>,
    pub canary_traffic_percent: Option<i64>,
    pub min_replicas: Option<i64>,
    pub max_replicas: Option<i64>,
    pub timeout_seconds: Option<i64>,
    /// Container resources; a conservative default is used when absent.
    pub resources: Option<Value>,
    pub service_account: Option<String>,
    pub gpu: bool,
}

/// Derive the deterministic, DNS-safe resource name for an endpoint intent.
pub fn serving_resource_name(prefix: &str, endpoint_id: &str) -> String {
    dns_safe_name(&format!(
        "{prefix}-{}",
        &endpoint_id[..endpoint_id.len().min(8)]
    ))
}

/// Render the `InferenceService` manifest.
pub fn build_inference_service(spec: &ServingSpec) -> Value {
    let mut annotations = serde_json::Map::new();
    if let Some(mode) = &spec.deployment_mode {
        annotations.insert(
            "serving.kserve.io/deploymentMode".to_string(),
            Value::String(mode.clone()),
        );
    }

    let mut predictor = serde_json::Map::new();
    if let Some(min) = spec.min_replicas {
        predictor.insert("minReplicas".to_string(), json!(min));
    }
    if let Some(max) = spec.max_replicas {
        predictor.insert("maxReplicas".to_string(), json!(max));
    }
    if let Some(pct) = spec.canary_traffic_percent.filter(|pct| *pct > 0) {
        predictor.insert("canaryTrafficPercent".to_string(), json!(pct));
    }
    if let Some(timeout) = spec.timeout_seconds {
        predictor.insert("timeout".to_string(), json!(timeout));
    }
    if let Some(sa) = &spec.service_account {
        predictor.insert("serviceAccountName".to_string(), json!(sa));
    }

    let mut resources = spec.resources.clone().unwrap_or_else(|| {
        json!({
            "requests": {"cpu": "250m", "memory": "512Mi"},
            "limits": {"cpu": "1000m", "memory": "1Gi"},
        })
    });
    if spec.gpu {
        resources["requests"]["nvidia.com/gpu"] = json!(1);
        resources["limits"]["nvidia.com/gpu"] = json!(1);
    }

    let mut model = serde_json::Map::new();
    model.insert("modelFormat".to_string(), json!({"name": spec.model_format}));
    if let Some(uri) = &spec.artifact_uri {
        model.insert("storageUri".to_string(), json!(uri));
    }
    if let Some(protocol) = &spec.protocol_version {
        model.insert("protocolVersion".to_string(), json!(protocol));
    }
    if let Some(runtime) = &spec.runtime_version {
        model.insert("runtimeVersion".to_string(), json!(runtime));
    }
    model.insert("resources".to_string(), resources);

    predictor.insert("model".to_string(), Value::Object(model));

    json!({
        "apiVersion": format!("{KSERVE_GROUP}/{KSERVE_VERSION}"),
        "kind": KSERVE_KIND,
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": {
                "mlops.tenancy/tenant-id": spec.tenant_id,
                "mlops.tenancy/project-id": spec.project_id,
                "mlops.platform/endpoint-id": spec.endpoint_id,
            },
            "annotations": Value::Object(annotations),
        },
        "spec": {
            "predictor": Value::Object(predictor),
        },
    })
}

/// Extract the assigned URL from an `InferenceService` status block once the
/// `Ready` condition is true.
pub fn ready_url(status: &Value) -> Option<String> {
    let url = status.get("url")?.as_str()?;
    let conditions = status.get("conditions")?.as_array()?;
    let ready = conditions.iter().any(|c| {
        c.get("type").and_then(Value::as_str) == Some("Ready")
            && c.get("status").and_then(Value::as_str) == Some("True")
    });
    ready.then(|| url.to_string())
}

/// Client for the `InferenceService` custom resource in one namespace.
#[derive(Clone)]
pub struct ServingClient {
    api: Api<DynamicObject>,
}

impl ServingClient {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        let ar = ApiResource {
            group: KSERVE_GROUP.to_string(),
            version: KSERVE_VERSION.to_string(),
            api_version: format!("{KSERVE_GROUP}/{KSERVE_VERSION}"),
            kind: KSERVE_KIND.to_string(),
            plural: KSERVE_PLURAL.to_string(),
        };
        Self {
            api: Api::namespaced_with(client, namespace, &ar),
        }
    }

    /// Create-or-update via server-side apply. Applying an unchanged
    /// manifest is a no-op, which keeps re-reconciles idempotent.
    pub async fn upsert(&self, name: &str, manifest: &Value) -> Result<(), PlaneError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api
            .patch(name, &params, &Patch::Apply(manifest))
            .await?;
        Ok(())
    }

    /// Poll until the resource reports a URL and the `Ready` condition,
    /// bounded by `timeout`.
    pub async fn wait_ready(
        &self,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<String, PlaneError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.api.get_opt(name).await {
                Ok(Some(obj)) => {
                    if let Some(url) = obj.data.get("status").and_then(|s| ready_url(s)) {
                        return Ok(url);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(name, error = %e, "Serving resource poll failed");
                }
            }

            if tokio::time::Instant::now() + poll_interval > deadline {
                return Err(PlaneError::NotReady {
                    name: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Delete the resource; a missing resource is already the desired state.
    pub async fn delete(&self, name: &str) -> Result<(), PlaneError> {
        match self.api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(PlaneError::Api(e)),
        }
    }
}
