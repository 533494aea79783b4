//! Tenancy context carried by every request and event.
//!
//! Identity arrives on trusted headers from the edge; this module only
//! validates shape, never authenticity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Header names the edge is trusted to set.
pub const HEADER_TENANT_ID: &str = "x-tenant-id";
pub const HEADER_PROJECT_ID: &str = "x-project-id";
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_ROLES: &str = "x-roles";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Resolved tenancy for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenancy {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    /// Opaque user identifier from the edge.
    pub user_id: String,
    /// Roles parsed from `X-Roles` (comma- or whitespace-separated).
    pub roles: Vec<String>,
    /// Propagated request id; generated when the edge did not send one.
    pub request_id: String,
}

impl Tenancy {
    /// Build a tenancy context from raw header values.
    ///
    /// `tenant_id` and `project_id` must be UUIDs and `user_id` non-empty.
    /// A missing `request_id` is replaced with a fresh UUID.
    pub fn from_headers(
        tenant_id: Option<&str>,
        project_id: Option<&str>,
        user_id: Option<&str>,
        roles: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Self, CoreError> {
        let tenant_raw = tenant_id.filter(|v| !v.is_empty()).ok_or_else(|| {
            CoreError::TenancyDenied("Missing X-Tenant-Id header".to_string())
        })?;
        let project_raw = project_id.filter(|v| !v.is_empty()).ok_or_else(|| {
            CoreError::TenancyDenied("Missing X-Project-Id header".to_string())
        })?;
        let user_id = user_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::TenancyDenied("Missing X-User-Id header".to_string()))?;

        let tenant_id = Uuid::parse_str(tenant_raw)
            .map_err(|_| CoreError::TenancyDenied("X-Tenant-Id must be a UUID".to_string()))?;
        let project_id = Uuid::parse_str(project_raw)
            .map_err(|_| CoreError::TenancyDenied("X-Project-Id must be a UUID".to_string()))?;

        let request_id = match request_id.filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        Ok(Self {
            tenant_id,
            project_id,
            user_id: user_id.to_string(),
            roles: parse_roles(roles.unwrap_or_default()),
            request_id,
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Split an `X-Roles` value on commas and whitespace, dropping empties.
fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "6f9b07f9-58f5-4d3a-8f2e-1d9c6a40f1aa";
    const PROJECT: &str = "9e2b3f11-1111-4e8a-9a61-1234567890ab";

    fn full() -> Tenancy {
        Tenancy::from_headers(
            Some(TENANT),
            Some(PROJECT),
            Some("user-1"),
            Some("admin, operator viewer"),
            Some("req-42"),
        )
        .unwrap()
    }

    #[test]
    fn parses_all_headers() {
        let t = full();
        assert_eq!(t.tenant_id.to_string(), TENANT);
        assert_eq!(t.project_id.to_string(), PROJECT);
        assert_eq!(t.user_id, "user-1");
        assert_eq!(t.request_id, "req-42");
    }

    #[test]
    fn roles_split_on_commas_and_whitespace() {
        let t = full();
        assert_eq!(t.roles, vec!["admin", "operator", "viewer"]);
        assert!(t.has_role("admin"));
        assert!(!t.has_role("owner"));
    }

    #[test]
    fn missing_tenant_header_is_denied() {
        let err =
            Tenancy::from_headers(None, Some(PROJECT), Some("u"), None, None).unwrap_err();
        assert!(matches!(err, CoreError::TenancyDenied(_)));
    }

    #[test]
    fn malformed_tenant_uuid_is_denied() {
        let err = Tenancy::from_headers(Some("not-a-uuid"), Some(PROJECT), Some("u"), None, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::TenancyDenied(_)));
    }

    #[test]
    fn empty_user_header_is_denied() {
        let err =
            Tenancy::from_headers(Some(TENANT), Some(PROJECT), Some(""), None, None).unwrap_err();
        assert!(matches!(err, CoreError::TenancyDenied(_)));
    }

    #[test]
    fn request_id_generated_when_absent() {
        let t = Tenancy::from_headers(Some(TENANT), Some(PROJECT), Some("u"), None, None).unwrap();
        assert!(Uuid::parse_str(&t.request_id).is_ok());
    }
}
