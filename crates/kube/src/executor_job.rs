//! Ephemeral executor Job construction and submission.
//!
//! Each dispatched GPU job becomes one `batch/v1` Job running the
//! `modelops-executor` binary with `JOB_ID` and `DISPATCH_TOKEN` in its
//! environment. The Job requests the pool's GPU resource, never restarts
//! (`backoffLimit: 0` -- the scheduler's orphan reclaim handles retries),
//! and cleans itself up via `ttlSecondsAfterFinished`.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};

use crate::{dns_safe_name, PlaneError};

/// Inputs for one executor Job.
#[derive(Debug, Clone)]
pub struct ExecutorJobSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    /// Environment passed to the executor container (`JOB_ID`,
    /// `DISPATCH_TOKEN`, `DATABASE_URL`, behavior settings).
    pub env: Vec<(String, String)>,
    pub node_selector: BTreeMap<String, String>,
    /// Extended resource to request, e.g. `nvidia.com/gpu` or a MIG profile
    /// resource such as `nvidia.com/mig-1g.5gb`.
    pub gpu_resource_name: String,
    pub gpu_resource_count: String,
    pub ttl_seconds_after_finished: i32,
}

/// Derive the Job name for one dispatch attempt. The token segment keeps
/// names unique across redispatches of the same job.
pub fn executor_job_name(job_id: &str, dispatch_token: &str) -> String {
    dns_safe_name(&format!(
        "gpu-exec-{}-{}",
        &job_id[..job_id.len().min(8)],
        &dispatch_token[..dispatch_token.len().min(8)],
    ))
}

/// Build the executor Job.
pub fn build_executor_job(spec: &ExecutorJobSpec) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "modelops-dispatcher".to_string(),
    );
    labels.insert("app".to_string(), "gpu-executor".to_string());

    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let mut gpu_request = BTreeMap::new();
    gpu_request.insert(
        spec.gpu_resource_name.clone(),
        Quantity(spec.gpu_resource_count.clone()),
    );

    let container = Container {
        name: "executor".to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["modelops-executor".to_string()]),
        env: Some(env),
        resources: Some(ResourceRequirements {
            requests: Some(gpu_request.clone()),
            limits: Some(gpu_request),
            ..Default::default()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(spec.ttl_seconds_after_finished),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: if spec.node_selector.is_empty() {
                        None
                    } else {
                        Some(spec.node_selector.clone())
                    },
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Thin client over the `batch/v1` Job API.
#[derive(Clone)]
pub struct BatchClient {
    api: Api<Job>,
}

impl BatchClient {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// Submit a Job. An already-existing Job with the same name means a
    /// previous delivery of the same dispatch event got through; treated as
    /// success so redeliveries stay idempotent.
    pub async fn submit(&self, job: &Job) -> Result<(), PlaneError> {
        match self.api.create(&PostParams::default(), job).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(PlaneError::Api(e)),
        }
    }
}
