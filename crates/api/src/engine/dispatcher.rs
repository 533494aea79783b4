//! Dispatch-event consumers.
//!
//! One consumer group per dispatch subject. In `direct` mode the executor
//! runs in-process (dev); in `ephemeral` mode each event becomes a compute
//! unit running the executor binary. Duplicated or stale events degrade to
//! no-ops through dispatch-token comparison at the store.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use modelops_core::scheduling::ERROR_DISPATCH_LAUNCH_FAILED;
use modelops_db::repositories::GpuJobRepo;
use modelops_events::messages::DispatchMessage;
use modelops_events::{Delivery, EventBus, Subject};
use modelops_executor::{run_job, Behavior, RunnerConfig};
use modelops_kube::executor_job::{build_executor_job, executor_job_name, BatchClient, ExecutorJobSpec};

use crate::config::{DispatchConfig, ExecutionMode};

use super::Disposition;

/// Consumer for one dispatch subject.
pub struct Dispatcher {
    pool: PgPool,
    bus: Arc<EventBus>,
    subject: Subject,
    config: Arc<DispatchConfig>,
    runner: RunnerConfig,
    batch: Option<BatchClient>,
}

impl Dispatcher {
    /// `batch` must be present in ephemeral mode; direct mode ignores it.
    pub fn new(
        pool: PgPool,
        bus: Arc<EventBus>,
        subject: Subject,
        config: Arc<DispatchConfig>,
        batch: Option<BatchClient>,
    ) -> Self {
        let runner = RunnerConfig {
            behavior: Behavior::parse(&config.executor_behavior).unwrap_or(Behavior::Simulate),
            http_timeout: Duration::from_secs(config.http_timeout_seconds),
            simulate_duration: Duration::from_millis(config.simulate_duration_ms),
        };
        Self {
            pool,
            bus,
            subject,
            config,
            runner,
            batch,
        }
    }

    fn group(&self) -> String {
        format!("gpu-dispatcher-{}", self.subject.as_str())
    }

    /// Consume the subject until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let sub = self.bus.subscribe(self.subject, &self.group());
        tracing::info!(
            subject = %self.subject,
            group = %self.group(),
            mode = ?self.config.mode,
            "Dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(subject = %self.subject, "Dispatcher shutting down");
                    break;
                }
                batch = sub.fetch(self.config.fetch_batch, self.config.fetch_timeout) => {
                    for delivery in batch {
                        self.settle(delivery).await;
                    }
                }
            }
        }
    }

    async fn settle(&self, delivery: Delivery) {
        let Ok(message) =
            serde_json::from_value::<DispatchMessage>(delivery.event().payload.clone())
        else {
            tracing::warn!(subject = %self.subject, "Malformed dispatch event, dropping");
            delivery.ack();
            return;
        };

        match self.process(&message, delivery.deliveries).await {
            Ok(Disposition::Ack) => delivery.ack(),
            Ok(Disposition::Nack) => delivery.nack(),
            Err(e) => {
                // Transient store fault: leave the event for redelivery.
                tracing::error!(job_id = %message.job_id, error = %e, "Dispatch processing failed");
                delivery.nack();
            }
        }
    }

    /// Handle one dispatch message. `deliveries` is the 1-based delivery
    /// count used to enforce the redelivery cap in ephemeral mode.
    pub async fn process(
        &self,
        message: &DispatchMessage,
        deliveries: u32,
    ) -> Result<Disposition, sqlx::Error> {
        match self.config.mode {
            ExecutionMode::Direct => self.process_direct(message).await,
            ExecutionMode::Ephemeral => self.process_ephemeral(message, deliveries).await,
        }
    }

    /// Direct mode: verify the token against the row, then run the executor
    /// in-process. A stale token means a newer dispatch attempt owns the
    /// job; the event is dropped.
    async fn process_direct(&self, message: &DispatchMessage) -> Result<Disposition, sqlx::Error> {
        let job = GpuJobRepo::find_by_id(&self.pool, message.job_id).await?;
        let current_token = job.as_ref().and_then(|j| j.dispatch_token);
        if current_token != Some(message.dispatch_token) {
            tracing::info!(job_id = %message.job_id, "Stale dispatch event, dropping");
            return Ok(Disposition::Ack);
        }

        run_job(
            &self.pool,
            Some(&self.bus),
            &self.runner,
            message.job_id,
            message.dispatch_token,
        )
        .await
        .map_err(|e| match e {
            modelops_executor::runner::RunnerError::Store(e) => e,
        })?;
        Ok(Disposition::Ack)
    }

    /// Ephemeral mode: synthesize and submit the compute unit. Submission
    /// failures are nacked for redelivery until the cap, then the job fails
    /// with `dispatch_launch_failed`.
    async fn process_ephemeral(
        &self,
        message: &DispatchMessage,
        deliveries: u32,
    ) -> Result<Disposition, sqlx::Error> {
        let Some(batch) = &self.batch else {
            tracing::error!("Ephemeral dispatcher without an orchestration client");
            return Ok(Disposition::Nack);
        };

        let gpu_resource_name = if self.subject == Subject::DispatchedMig {
            &self.config.mig_resource_name
        } else {
            &self.config.gpu_resource_name
        };

        let job_id = message.job_id.to_string();
        let token = message.dispatch_token.to_string();
        let spec = ExecutorJobSpec {
            name: executor_job_name(&job_id, &token),
            namespace: self.config.namespace.clone(),
            image: self.config.executor_image.clone(),
            env: vec![
                ("DATABASE_URL".to_string(), self.config.database_url.clone()),
                ("JOB_ID".to_string(), job_id),
                ("DISPATCH_TOKEN".to_string(), token),
                (
                    "GPU_EXECUTOR".to_string(),
                    self.config.executor_behavior.clone(),
                ),
                (
                    "HTTP_TIMEOUT_SECONDS".to_string(),
                    self.config.http_timeout_seconds.to_string(),
                ),
            ],
            node_selector: [(
                self.config.node_selector_key.clone(),
                self.config.node_selector_value.clone(),
            )]
            .into(),
            gpu_resource_name: gpu_resource_name.clone(),
            gpu_resource_count: self.config.gpu_resource_count.clone(),
            ttl_seconds_after_finished: self.config.unit_ttl_seconds,
        };

        match batch.submit(&build_executor_job(&spec)).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %message.job_id,
                    unit = %spec.name,
                    resource = %spec.gpu_resource_name,
                    "Ephemeral executor submitted",
                );
                Ok(Disposition::Ack)
            }
            Err(e) if deliveries >= self.config.max_deliveries => {
                tracing::error!(
                    job_id = %message.job_id,
                    deliveries,
                    error = %e,
                    "Launch retries exhausted, failing job",
                );
                GpuJobRepo::fail_dispatched(
                    &self.pool,
                    message.job_id,
                    message.dispatch_token,
                    ERROR_DISPATCH_LAUNCH_FAILED,
                )
                .await?;
                Ok(Disposition::Ack)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %message.job_id,
                    deliveries,
                    error = %e,
                    "Unit submission failed, requeueing event",
                );
                Ok(Disposition::Nack)
            }
        }
    }
}
