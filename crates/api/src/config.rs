//! Service configuration loaded from environment variables.
//!
//! All fields have defaults suitable for local development; production
//! overrides everything via the environment.

use std::time::Duration;

use modelops_core::scheduling::{
    DEFAULT_MAX_DISPATCH_ATTEMPTS, DEFAULT_MIG_TOTAL_SLOTS, DEFAULT_T4_EXCLUSIVE_SLOTS,
    DEFAULT_T4_SHARED_SLOTS,
};

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// HTTP listener settings.
///
/// | Env Var                | Default   |
/// |------------------------|-----------|
/// | `HOST`                 | `0.0.0.0` |
/// | `PORT`                 | `8000`    |
/// | `REQUEST_TIMEOUT_SECS` | `30`      |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parsed("PORT", 8000),
            request_timeout_secs: env_parsed("REQUEST_TIMEOUT_SECS", 30),
        }
    }
}

/// Which request paths bypass tenancy enforcement.
///
/// `TENANCY_SKIP_PATHS` is comma-separated; a trailing `*` matches by
/// prefix. Defaults to the health and metrics endpoints.
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    pub skip_paths: Vec<String>,
}

impl TenancyConfig {
    pub fn from_env() -> Self {
        let raw = env_string("TENANCY_SKIP_PATHS", "/healthz,/metrics");
        Self {
            skip_paths: raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_skipped(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|rule| {
            if let Some(prefix) = rule.strip_suffix('*') {
                path.starts_with(prefix)
            } else {
                path == rule
            }
        })
    }
}

/// Idempotency record TTL and storage limits.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub ttl_seconds: i64,
    /// Responses larger than this are replayed from memory but not stored.
    pub max_body_bytes: usize,
    pub sweep_interval: Duration,
}

impl IdempotencyConfig {
    pub fn from_env() -> Self {
        Self {
            ttl_seconds: env_parsed("IDEMPOTENCY_TTL_SECONDS", 86_400),
            max_body_bytes: env_parsed("IDEMPOTENCY_MAX_BODY_BYTES", 1_048_576),
            sweep_interval: Duration::from_secs(env_parsed("IDEMPOTENCY_SWEEP_INTERVAL_SECS", 300)),
        }
    }
}

/// Scheduler capacity and timing.
///
/// | Env Var                 | Default | Notes                                  |
/// |-------------------------|---------|----------------------------------------|
/// | `T4_SHARED_SLOTS`       | `8`     | Must equal time-slicing replica count  |
/// | `T4_EXCLUSIVE_SLOTS`    | `1`     |                                        |
/// | `MIG_TOTAL_SLOTS`       | `0`     |                                        |
/// | `SCHEDULER_TICK_MS`     | `500`   |                                        |
/// | `DISPATCH_TIMEOUT`      | `120`   | Seconds before a DISPATCHED orphan     |
/// | `EXECUTION_TIMEOUT`     | `600`   | Seconds before a RUNNING job is failed |
/// | `MAX_DISPATCH_ATTEMPTS` | `3`     |                                        |
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub t4_shared_slots: i64,
    pub t4_exclusive_slots: i64,
    pub mig_total_slots: i64,
    pub tick_interval: Duration,
    pub dispatch_timeout: Duration,
    pub execution_timeout: Duration,
    pub max_dispatch_attempts: i32,
    /// Upper bound on candidates examined per tick.
    pub candidate_batch: i64,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            t4_shared_slots: env_parsed("T4_SHARED_SLOTS", DEFAULT_T4_SHARED_SLOTS),
            t4_exclusive_slots: env_parsed("T4_EXCLUSIVE_SLOTS", DEFAULT_T4_EXCLUSIVE_SLOTS),
            mig_total_slots: env_parsed("MIG_TOTAL_SLOTS", DEFAULT_MIG_TOTAL_SLOTS),
            tick_interval: Duration::from_millis(env_parsed("SCHEDULER_TICK_MS", 500)),
            dispatch_timeout: Duration::from_secs(env_parsed("DISPATCH_TIMEOUT", 120)),
            execution_timeout: Duration::from_secs(env_parsed("EXECUTION_TIMEOUT", 600)),
            max_dispatch_attempts: env_parsed(
                "MAX_DISPATCH_ATTEMPTS",
                DEFAULT_MAX_DISPATCH_ATTEMPTS,
            ),
            candidate_batch: env_parsed("SCHEDULER_CANDIDATE_BATCH", 100),
        }
    }
}

/// How dispatch events become running executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run the executor inside this process (dev).
    Direct,
    /// Launch an ephemeral compute unit per job.
    Ephemeral,
}

impl ExecutionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(ExecutionMode::Direct),
            "ephemeral" => Some(ExecutionMode::Ephemeral),
            _ => None,
        }
    }
}

/// Dispatcher settings, including everything an ephemeral unit needs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub mode: ExecutionMode,
    /// Redeliveries allowed before a job fails with
    /// `dispatch_launch_failed`.
    pub max_deliveries: u32,
    pub fetch_batch: usize,
    pub fetch_timeout: Duration,
    pub namespace: String,
    pub executor_image: String,
    pub unit_ttl_seconds: i32,
    pub node_selector_key: String,
    pub node_selector_value: String,
    /// Extended resource for T4 units, e.g. `nvidia.com/gpu`.
    pub gpu_resource_name: String,
    /// Extended resource for MIG units, e.g. `nvidia.com/mig-1g.5gb`.
    pub mig_resource_name: String,
    pub gpu_resource_count: String,
    /// Propagated into unit environments.
    pub database_url: String,
    pub executor_behavior: String,
    pub http_timeout_seconds: u64,
    pub simulate_duration_ms: u64,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let mode = std::env::var("GPU_EXECUTION_MODE")
            .ok()
            .and_then(|v| ExecutionMode::parse(&v))
            .unwrap_or(ExecutionMode::Direct);
        Self {
            mode,
            max_deliveries: env_parsed("DISPATCH_MAX_DELIVERIES", 5),
            fetch_batch: 10,
            fetch_timeout: Duration::from_secs(1),
            namespace: env_string("GPU_JOB_NAMESPACE", "mlops-system"),
            executor_image: env_string("GPU_EXECUTOR_IMAGE", ""),
            unit_ttl_seconds: env_parsed("GPU_JOB_TTL_SECONDS", 120),
            node_selector_key: env_string("GPU_NODE_SELECTOR_KEY", "nvidia.com/device-plugin.config"),
            node_selector_value: env_string("GPU_NODE_SELECTOR_VALUE", "tesla-t4"),
            gpu_resource_name: env_string("GPU_RESOURCE_NAME", "nvidia.com/gpu"),
            mig_resource_name: env_string("MIG_RESOURCE_NAME", "nvidia.com/mig-1g.5gb"),
            gpu_resource_count: env_string("GPU_RESOURCE_COUNT", "1"),
            database_url: env_string("DATABASE_URL", ""),
            executor_behavior: env_string("GPU_EXECUTOR", "simulate"),
            http_timeout_seconds: env_parsed("HTTP_TIMEOUT_SECONDS", 300),
            simulate_duration_ms: env_parsed("SIMULATE_DURATION_MS", 2000),
        }
    }
}

/// How the deploy worker realizes endpoint intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Simulate,
    Reconcile,
}

impl DeployMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simulate" => Some(DeployMode::Simulate),
            "reconcile" => Some(DeployMode::Reconcile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub mode: DeployMode,
    pub namespace: String,
    pub name_prefix: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_deliveries: u32,
    pub fetch_batch: usize,
    pub fetch_timeout: Duration,
}

impl DeployConfig {
    pub fn from_env() -> Self {
        let mode = std::env::var("DEPLOY_MODE")
            .ok()
            .and_then(|v| DeployMode::parse(&v))
            .unwrap_or(DeployMode::Simulate);
        Self {
            mode,
            namespace: env_string("SERVING_NAMESPACE", "mlops-serving"),
            name_prefix: env_string("SERVING_NAME_PREFIX", "isvc"),
            timeout: Duration::from_secs(env_parsed("DEPLOY_TIMEOUT_SECONDS", 600)),
            poll_interval: Duration::from_secs(env_parsed("DEPLOY_POLL_INTERVAL_SECS", 3)),
            max_deliveries: env_parsed("DEPLOY_MAX_DELIVERIES", 5),
            fetch_batch: 10,
            fetch_timeout: Duration::from_secs(1),
        }
    }
}

/// Aggregated configuration for the whole service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tenancy: TenancyConfig,
    pub idempotency: IdempotencyConfig,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub deploy: DeployConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            tenancy: TenancyConfig::from_env(),
            idempotency: IdempotencyConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
            deploy: DeployConfig::from_env(),
        }
    }
}
