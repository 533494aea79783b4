//! Token-guarded execution of a single dispatched GPU job.
//!
//! The runner performs exactly one pass of the job lifecycle:
//! claim (`DISPATCHED -> RUNNING`), do the work, settle
//! (`RUNNING -> SUCCEEDED | FAILED`), append the metering row. Every
//! transition presents the dispatch token, so a stale runner -- redelivered
//! event, superseded dispatch attempt -- degrades to a silent no-op.

use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use modelops_core::outbound::OutboundClient;
use modelops_core::retry::{retry, Backoff};
use modelops_core::tenancy::Tenancy;
use modelops_db::models::gpu_job::{ClaimedJob, JobTimestamps};
use modelops_db::models::usage::{METER_GPU_SECONDS, SUBJECT_GPU_JOB};
use modelops_db::repositories::{GpuJobRepo, UsageRepo};
use modelops_events::messages::UsageRecordedMessage;
use modelops_events::{Event, EventBus, Subject};

/// What the executor does with a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Sleep for a configurable duration and synthesize a response.
    Simulate,
    /// POST `request_json` to `target_url` and record the response.
    Http,
}

impl Behavior {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simulate" => Some(Behavior::Simulate),
            "http" => Some(Behavior::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub behavior: Behavior,
    pub http_timeout: Duration,
    pub simulate_duration: Duration,
}

impl RunnerConfig {
    /// Load from `GPU_EXECUTOR`, `HTTP_TIMEOUT_SECONDS`, and
    /// `SIMULATE_DURATION_MS`.
    pub fn from_env() -> Self {
        let behavior = std::env::var("GPU_EXECUTOR")
            .ok()
            .and_then(|v| Behavior::parse(&v))
            .unwrap_or(Behavior::Simulate);
        let http_timeout_secs: u64 = std::env::var("HTTP_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        let simulate_ms: u64 = std::env::var("SIMULATE_DURATION_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);
        Self {
            behavior,
            http_timeout: Duration::from_secs(http_timeout_secs),
            simulate_duration: Duration::from_millis(simulate_ms),
        }
    }
}

/// How one runner pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The dispatch token did not match (another executor owns the job) or
    /// the job left RUNNING underneath us. Nothing was written.
    Stale,
    Succeeded,
    Failed,
}

/// Infrastructure failures that should make the compute unit's controller
/// retry (nonzero exit). Work failures are not errors -- they settle the job
/// as FAILED.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Execute one dispatched job end to end.
///
/// When `bus` is present (direct mode), a `usage_recorded` event follows the
/// ledger write; the standalone binary runs without a bus.
pub async fn run_job(
    pool: &PgPool,
    bus: Option<&EventBus>,
    config: &RunnerConfig,
    job_id: Uuid,
    dispatch_token: Uuid,
) -> Result<Outcome, RunnerError> {
    let Some(job) = GpuJobRepo::claim_running(pool, job_id, dispatch_token).await? else {
        tracing::info!(%job_id, "Stale dispatch token or already claimed, skipping");
        return Ok(Outcome::Stale);
    };

    tracing::info!(
        %job_id,
        tenant_id = %job.tenant_id,
        pool = job.gpu_pool_assigned.as_str(),
        isolation = job.isolation_level.as_str(),
        "Job claimed for execution",
    );

    let work = perform(config, &job).await;

    let settled = match &work {
        Ok(response) => {
            retry(Backoff::default(), || {
                GpuJobRepo::complete(pool, job_id, dispatch_token, response)
            })
            .await?
        }
        Err(error) => {
            retry(Backoff::default(), || {
                GpuJobRepo::fail_running(pool, job_id, dispatch_token, error)
            })
            .await?
        }
    };

    let Some(stamps) = settled else {
        // The orphan reclaim raced us out of RUNNING; the store already
        // holds the authoritative terminal state.
        tracing::warn!(%job_id, "Job left RUNNING before settlement, skipping metering");
        return Ok(Outcome::Stale);
    };

    let outcome = match &work {
        Ok(_) => Outcome::Succeeded,
        Err(error) => {
            tracing::warn!(%job_id, error = %error, "Job failed");
            Outcome::Failed
        }
    };

    record_usage(pool, bus, &job, stamps, outcome).await?;
    Ok(outcome)
}

async fn perform(config: &RunnerConfig, job: &ClaimedJob) -> Result<serde_json::Value, String> {
    match config.behavior {
        Behavior::Simulate => {
            tokio::time::sleep(config.simulate_duration).await;
            Ok(json!({
                "ok": true,
                "target_url": job.target_url,
                "echo": job.request_json,
            }))
        }
        Behavior::Http => {
            let tenancy = Tenancy {
                tenant_id: job.tenant_id,
                project_id: job.project_id,
                user_id: job.created_by.clone(),
                roles: Vec::new(),
                request_id: job.id.to_string(),
            };
            OutboundClient::new(config.http_timeout)
                .post_json(&job.target_url, Some(&tenancy), &job.request_json)
                .await
                .map_err(|e| e.to_string())
        }
    }
}

/// Append the `gpu_seconds` ledger row and publish `usage_recorded`.
async fn record_usage(
    pool: &PgPool,
    bus: Option<&EventBus>,
    job: &ClaimedJob,
    stamps: JobTimestamps,
    outcome: Outcome,
) -> Result<(), RunnerError> {
    let gpu_seconds =
        ((stamps.finished_at - stamps.started_at).num_milliseconds().max(0) as f64) / 1000.0;
    let labels = json!({
        "pool": job.gpu_pool_assigned.as_str(),
        "isolation": job.isolation_level.as_str(),
    });

    retry(Backoff::default(), || {
        UsageRepo::append(
            pool,
            job.tenant_id,
            job.project_id,
            SUBJECT_GPU_JOB,
            job.id,
            METER_GPU_SECONDS,
            gpu_seconds,
            &labels,
        )
    })
    .await?;

    if let Some(bus) = bus {
        let status = match outcome {
            Outcome::Succeeded => "SUCCEEDED",
            _ => "FAILED",
        };
        bus.publish(Event::from_message(
            Subject::UsageRecorded,
            &UsageRecordedMessage {
                tenant_id: job.tenant_id,
                project_id: job.project_id,
                job_id: job.id,
                status: status.to_string(),
                gpu_seconds,
            },
        ));
    }

    tracing::info!(job_id = %job.id, gpu_seconds, "Usage recorded");
    Ok(())
}
