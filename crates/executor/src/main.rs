//! `modelops-executor` -- single-shot GPU job executor.
//!
//! Runs inside an ephemeral compute unit launched by the dispatcher, claims
//! exactly one job, performs its work, settles it, and exits.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default    | Description                          |
//! |------------------------|----------|------------|--------------------------------------|
//! | `DATABASE_URL`         | yes      | --         | Postgres connection string           |
//! | `JOB_ID`               | yes      | --         | Job to execute                       |
//! | `DISPATCH_TOKEN`       | yes      | --         | Token gating all transitions         |
//! | `GPU_EXECUTOR`         | no       | `simulate` | `simulate` or `http`                 |
//! | `HTTP_TIMEOUT_SECONDS` | no       | `300`      | Outbound call timeout (`http` mode)  |
//! | `SIMULATE_DURATION_MS` | no       | `2000`     | Sleep length (`simulate` mode)       |
//!
//! # Exit codes
//!
//! `0` after any clean transition to a terminal state (including `FAILED`)
//! or a stale-token no-op; nonzero only on infrastructure errors, so the
//! compute unit's controller retries those and nothing else.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use modelops_executor::{run_job, Outcome, RunnerConfig};

fn required_env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| {
        tracing::error!("{name} environment variable is required");
        std::process::exit(1);
    })
}

fn required_uuid(name: &str) -> Uuid {
    required_env(name).parse().unwrap_or_else(|_| {
        tracing::error!("{name} must be a UUID");
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelops_executor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = required_env("DATABASE_URL");
    let job_id = required_uuid("JOB_ID");
    let dispatch_token = required_uuid("DISPATCH_TOKEN");
    let config = RunnerConfig::from_env();

    tracing::info!(%job_id, behavior = ?config.behavior, "Starting modelops-executor");

    let pool = match modelops_db::create_pool(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    match run_job(&pool, None, &config, job_id, dispatch_token).await {
        Ok(Outcome::Succeeded) => tracing::info!(%job_id, "Job succeeded"),
        Ok(Outcome::Failed) => tracing::info!(%job_id, "Job settled as failed"),
        Ok(Outcome::Stale) => tracing::info!(%job_id, "Nothing to do (stale token)"),
        Err(e) => {
            // Infrastructure failure: exit nonzero so the unit's controller
            // retries; the scheduler's reclaim covers the job row.
            tracing::error!(%job_id, error = %e, "Executor infrastructure error");
            std::process::exit(1);
        }
    }
}
