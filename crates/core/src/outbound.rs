//! Tenancy-aware outbound HTTP helper.
//!
//! All outbound calls from the core go through this client so that tenant,
//! project, user, roles, and request id propagate to downstream services and
//! every call carries a timeout.

use std::time::Duration;

use serde_json::Value;

use crate::tenancy::{
    Tenancy, HEADER_PROJECT_ID, HEADER_REQUEST_ID, HEADER_ROLES, HEADER_TENANT_ID, HEADER_USER_ID,
};

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Thin wrapper over a shared [`reqwest::Client`] with a per-call timeout.
#[derive(Debug, Clone)]
pub struct OutboundClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl OutboundClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// POST a JSON body, propagating tenancy headers when available.
    ///
    /// Non-2xx responses surface as [`OutboundError::Status`].
    pub async fn post_json(
        &self,
        url: &str,
        tenancy: Option<&Tenancy>,
        body: &Value,
    ) -> Result<Value, OutboundError> {
        let mut request = self.client.post(url).timeout(self.timeout).json(body);

        if let Some(t) = tenancy {
            request = request
                .header(HEADER_TENANT_ID, t.tenant_id.to_string())
                .header(HEADER_PROJECT_ID, t.project_id.to_string())
                .header(HEADER_USER_ID, &t.user_id)
                .header(HEADER_REQUEST_ID, &t.request_id);
            if !t.roles.is_empty() {
                request = request.header(HEADER_ROLES, t.roles.join(","));
            }
        }

        let response = request.send().await.map_err(|source| OutboundError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OutboundError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|source| OutboundError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
