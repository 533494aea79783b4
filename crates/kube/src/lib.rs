//! `modelops-kube` -- orchestration-plane client.
//!
//! Two surfaces: ephemeral executor Jobs (`batch/v1`) for the GPU dispatcher
//! and KServe `InferenceService` custom resources for the deploy worker.

pub mod executor_job;
pub mod inference;

/// Errors from the orchestration plane.
#[derive(Debug, thiserror::Error)]
pub enum PlaneError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("serving resource {name} not ready within {timeout_secs}s")]
    NotReady { name: String, timeout_secs: u64 },
}

/// Sanitize a string into a DNS-1123 label: lowercase alphanumerics and
/// dashes, no leading/trailing dash, at most 63 characters.
pub fn dns_safe_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    trimmed.chars().take(63).collect::<String>().trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_safe_name_lowercases_and_collapses() {
        assert_eq!(dns_safe_name("Gpu Exec_1234"), "gpu-exec-1234");
        assert_eq!(dns_safe_name("--weird--name--"), "weird-name");
    }

    #[test]
    fn dns_safe_name_truncates_to_63() {
        let long = "a".repeat(100);
        assert_eq!(dns_safe_name(&long).len(), 63);
    }
}
