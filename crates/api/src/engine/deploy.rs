//! Deploy worker: reconciles endpoint intents into serving resources.
//!
//! Consumes `deploy_requested` and `delete_requested`. Validation runs
//! before any plane call in both modes, so an invalid intent goes `FAILED`
//! without an upsert. Re-reconciles are idempotent because the rendered
//! spec is a pure function of the intent.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use modelops_core::retry::{retry, Backoff};
use modelops_db::models::endpoint::Endpoint;
use modelops_db::models::status::EndpointStatus;
use modelops_db::repositories::EndpointRepo;
use modelops_events::messages::EndpointMessage;
use modelops_events::{Delivery, EventBus, Subject};
use modelops_kube::inference::{
    build_inference_service, serving_resource_name, ServingClient, ServingSpec,
};

use crate::config::{DeployConfig, DeployMode};

use super::Disposition;

/// Deployment-mode annotation values KServe treats as serverless. Canary
/// traffic splits require one of these.
const SERVERLESS_MODES: [&str; 2] = ["Serverless", "Knative"];

/// Background worker consuming the deploy and delete subjects.
pub struct DeployWorker {
    pool: PgPool,
    bus: Arc<EventBus>,
    config: Arc<DeployConfig>,
    serving: Option<ServingClient>,
}

impl DeployWorker {
    /// `serving` must be present in reconcile mode; simulate ignores it.
    pub fn new(
        pool: PgPool,
        bus: Arc<EventBus>,
        config: Arc<DeployConfig>,
        serving: Option<ServingClient>,
    ) -> Self {
        Self {
            pool,
            bus,
            config,
            serving,
        }
    }

    /// Consume both subjects until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let deploy_sub = self.bus.subscribe(Subject::DeployRequested, "deploy-worker");
        let delete_sub = self
            .bus
            .subscribe(Subject::DeleteRequested, "deploy-worker-delete");
        tracing::info!(mode = ?self.config.mode, "Deploy worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Deploy worker shutting down");
                    break;
                }
                batch = deploy_sub.fetch(self.config.fetch_batch, self.config.fetch_timeout) => {
                    for delivery in batch {
                        self.settle_deploy(delivery).await;
                    }
                }
                batch = delete_sub.fetch(self.config.fetch_batch, self.config.fetch_timeout) => {
                    for delivery in batch {
                        self.settle_delete(delivery).await;
                    }
                }
            }
        }
    }

    fn parse(delivery: &Delivery) -> Option<EndpointMessage> {
        serde_json::from_value(delivery.event().payload.clone()).ok()
    }

    async fn settle_deploy(&self, delivery: Delivery) {
        let Some(message) = Self::parse(&delivery) else {
            tracing::warn!("Malformed deploy event, dropping");
            delivery.ack();
            return;
        };
        match self.process_deploy(message.endpoint_id).await {
            Ok(()) => delivery.ack(),
            Err(e) => {
                tracing::error!(endpoint_id = %message.endpoint_id, error = %e, "Deploy processing failed");
                delivery.nack();
            }
        }
    }

    async fn settle_delete(&self, delivery: Delivery) {
        let Some(message) = Self::parse(&delivery) else {
            tracing::warn!("Malformed delete event, dropping");
            delivery.ack();
            return;
        };
        match self
            .process_delete(message.endpoint_id, delivery.deliveries)
            .await
        {
            Ok(Disposition::Ack) => delivery.ack(),
            Ok(Disposition::Nack) => delivery.nack(),
            Err(e) => {
                tracing::error!(endpoint_id = %message.endpoint_id, error = %e, "Delete processing failed");
                delivery.nack();
            }
        }
    }

    /// Realize one endpoint intent. Validation failures and reconcile
    /// failures settle the intent as `FAILED`; only store faults propagate.
    pub async fn process_deploy(&self, endpoint_id: Uuid) -> Result<(), sqlx::Error> {
        let Some(endpoint) = EndpointRepo::find_by_id(&self.pool, endpoint_id).await? else {
            tracing::warn!(%endpoint_id, "Deploy requested for unknown endpoint");
            return Ok(());
        };

        if !matches!(
            endpoint.status,
            EndpointStatus::Creating | EndpointStatus::Ready
        ) {
            tracing::info!(
                %endpoint_id,
                status = endpoint.status.as_str(),
                "Endpoint not reconcilable, skipping",
            );
            return Ok(());
        }

        let spec = match render_serving_spec(&endpoint, &self.config) {
            Ok(spec) => spec,
            Err(reason) => {
                tracing::warn!(%endpoint_id, %reason, "Endpoint intent failed validation");
                self.set_status(endpoint_id, EndpointStatus::Failed, None, Some(&reason))
                    .await?;
                return Ok(());
            }
        };

        let url = match self.config.mode {
            DeployMode::Simulate => Ok(format!("http://{}.example.local", spec.name)),
            DeployMode::Reconcile => self.reconcile(&spec).await,
        };

        match url {
            Ok(url) => {
                self.set_status(endpoint_id, EndpointStatus::Ready, Some(&url), None)
                    .await?;
                tracing::info!(%endpoint_id, %url, "Endpoint ready");
            }
            Err(reason) => {
                self.set_status(endpoint_id, EndpointStatus::Failed, None, Some(&reason))
                    .await?;
                tracing::warn!(%endpoint_id, %reason, "Endpoint reconcile failed");
            }
        }
        Ok(())
    }

    async fn reconcile(&self, spec: &ServingSpec) -> Result<String, String> {
        let Some(serving) = &self.serving else {
            return Err("reconcile mode without an orchestration client".to_string());
        };
        let manifest = build_inference_service(spec);
        serving
            .upsert(&spec.name, &manifest)
            .await
            .map_err(|e| format!("serving upsert failed: {e}"))?;
        serving
            .wait_ready(&spec.name, self.config.timeout, self.config.poll_interval)
            .await
            .map_err(|e| e.to_string())
    }

    /// Tear down the serving resource and finish the soft delete by
    /// renaming the row, which releases the name uniqueness constraint.
    pub async fn process_delete(
        &self,
        endpoint_id: Uuid,
        deliveries: u32,
    ) -> Result<Disposition, sqlx::Error> {
        let Some(endpoint) = EndpointRepo::find_by_id(&self.pool, endpoint_id).await? else {
            return Ok(Disposition::Ack);
        };
        if endpoint.status == EndpointStatus::Deleted {
            return Ok(Disposition::Ack);
        }

        if self.config.mode == DeployMode::Reconcile {
            if let Some(serving) = &self.serving {
                let name =
                    serving_resource_name(&self.config.name_prefix, &endpoint_id.to_string());
                if let Err(e) = serving.delete(&name).await {
                    if deliveries < self.config.max_deliveries {
                        tracing::warn!(%endpoint_id, error = %e, "Serving delete failed, requeueing");
                        return Ok(Disposition::Nack);
                    }
                    tracing::error!(%endpoint_id, error = %e, "Serving delete retries exhausted");
                    self.set_status(
                        endpoint_id,
                        EndpointStatus::Failed,
                        None,
                        Some(&format!("serving delete failed: {e}")),
                    )
                    .await?;
                    return Ok(Disposition::Ack);
                }
            }
        }

        retry(Backoff::default(), || {
            EndpointRepo::mark_deleted(&self.pool, endpoint_id)
        })
        .await?;
        tracing::info!(%endpoint_id, "Endpoint deleted");
        Ok(Disposition::Ack)
    }

    async fn set_status(
        &self,
        endpoint_id: Uuid,
        status: EndpointStatus,
        url: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        retry(Backoff::default(), || {
            EndpointRepo::set_status(&self.pool, endpoint_id, status, url, error)
        })
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation + rendering
// ---------------------------------------------------------------------------

fn as_i64_strict(value: &serde_json::Value) -> Option<i64> {
    value.as_i64()
}

fn truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => {
            matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
        }
        _ => false,
    }
}

/// Validate an intent and render the serving spec for it.
///
/// Rules:
/// - `canaryTrafficPercent` must be an integer within 0..=100.
/// - A positive canary split requires the serverless deployment mode
///   (defaulted when unset).
/// - `modelFormat = triton` requires `protocolVersion = v2` (defaulted when
///   unset).
pub fn render_serving_spec(
    endpoint: &Endpoint,
    config: &DeployConfig,
) -> Result<ServingSpec, String> {
    let traffic = &endpoint.traffic;
    let runtime_config = &endpoint.runtime_config;
    let autoscaling = &endpoint.autoscaling;

    let canary = match traffic.get("canaryTrafficPercent") {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => {
            let pct = as_i64_strict(value)
                .ok_or("canaryTrafficPercent must be an integer".to_string())?;
            if !(0..=100).contains(&pct) {
                return Err(format!(
                    "canaryTrafficPercent must be within 0..=100, got {pct}"
                ));
            }
            Some(pct)
        }
    };

    let deployment_mode = runtime_config
        .get("deploymentMode")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let deployment_mode = if canary.is_some_and(|pct| pct > 0) {
        // Canary rollouts require Knative-backed serving.
        match deployment_mode {
            None => Some("Serverless".to_string()),
            Some(mode) if SERVERLESS_MODES.contains(&mode.as_str()) => Some(mode),
            Some(mode) => {
                return Err(format!(
                    "canary traffic requires the serverless deployment mode, got {mode}"
                ));
            }
        }
    } else {
        deployment_mode
    };

    let model_format = runtime_config
        .get("modelFormat")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if endpoint.runtime.contains("triton") {
                "triton".to_string()
            } else {
                "sklearn".to_string()
            }
        });

    let protocol_version = runtime_config
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let protocol_version = if model_format == "triton" {
        match protocol_version {
            None => Some("v2".to_string()),
            Some(v) if v == "v2" => Some(v),
            Some(v) => {
                return Err(format!("triton endpoints require protocolVersion v2, got {v}"));
            }
        }
    } else {
        protocol_version
    };

    Ok(ServingSpec {
        name: serving_resource_name(&config.name_prefix, &endpoint.id.to_string()),
        namespace: config.namespace.clone(),
        tenant_id: endpoint.tenant_id.to_string(),
        project_id: endpoint.project_id.to_string(),
        endpoint_id: endpoint.id.to_string(),
        artifact_uri: endpoint.artifact_uri.clone(),
        model_format,
        protocol_version,
        runtime_version: runtime_config
            .get("runtimeVersion")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        deployment_mode,
        canary_traffic_percent: canary,
        min_replicas: autoscaling.get("minReplicas").and_then(as_i64_strict),
        max_replicas: autoscaling.get("maxReplicas").and_then(as_i64_strict),
        timeout_seconds: runtime_config.get("timeout").and_then(as_i64_strict),
        resources: runtime_config.get("resources").cloned().filter(|v| v.is_object()),
        service_account: runtime_config
            .get("serviceAccountName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        gpu: truthy(runtime_config.get("gpu")),
    })
}
