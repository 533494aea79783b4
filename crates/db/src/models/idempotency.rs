//! Idempotency record model.

use modelops_core::types::Timestamp;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `idempotency_keys` table.
///
/// A row with `status_code = NULL` is a placeholder for a request that is
/// still in progress; concurrent identical POSTs race on the unique index
/// and the loser replays once the winner finalizes.
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub method: String,
    pub path: String,
    pub idem_key: String,
    pub request_hash: String,
    pub status_code: Option<i32>,
    pub response_headers: Option<Value>,
    pub response_body: Option<Vec<u8>>,
    pub expires_at: Timestamp,
}

/// The five-part key that scopes an idempotency record.
#[derive(Debug, Clone)]
pub struct IdempotencyScope {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub method: String,
    pub path: String,
    pub idem_key: String,
}
