//! Repository for the `idempotency_keys` table.
//!
//! Concurrent identical POSTs race to insert the placeholder on the
//! `uq_idempotency_keys_scope` unique index; the loser reads the winner's
//! record and replays or reports in-progress.

use sqlx::PgPool;

use crate::models::idempotency::{IdempotencyRecord, IdempotencyScope};

const COLUMNS: &str = "\
    tenant_id, project_id, method, path, idem_key, request_hash, \
    status_code, response_headers, response_body, expires_at";

/// Outcome of attempting to insert a placeholder row.
#[derive(Debug, PartialEq, Eq)]
pub enum PlaceholderInsert {
    Inserted,
    /// Another request with the same scope already holds the key.
    AlreadyExists,
}

pub struct IdempotencyRepo;

impl IdempotencyRepo {
    /// Find a non-expired record for the scope.
    pub async fn find(
        pool: &PgPool,
        scope: &IdempotencyScope,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM idempotency_keys \
             WHERE tenant_id = $1 AND project_id = $2 \
               AND method = $3 AND path = $4 AND idem_key = $5 \
               AND expires_at > now()"
        );
        sqlx::query_as::<_, IdempotencyRecord>(&query)
            .bind(scope.tenant_id)
            .bind(scope.project_id)
            .bind(&scope.method)
            .bind(&scope.path)
            .bind(&scope.idem_key)
            .fetch_optional(pool)
            .await
    }

    /// Insert an in-progress placeholder (NULL `status_code`).
    pub async fn insert_placeholder(
        pool: &PgPool,
        scope: &IdempotencyScope,
        request_hash: &str,
        ttl_seconds: i64,
    ) -> Result<PlaceholderInsert, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO idempotency_keys \
                 (tenant_id, project_id, method, path, idem_key, request_hash, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now() + ($7 * interval '1 second')) \
             ON CONFLICT ON CONSTRAINT uq_idempotency_keys_scope DO NOTHING",
        )
        .bind(scope.tenant_id)
        .bind(scope.project_id)
        .bind(&scope.method)
        .bind(&scope.path)
        .bind(&scope.idem_key)
        .bind(request_hash)
        .bind(ttl_seconds as f64)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(PlaceholderInsert::Inserted)
        } else {
            Ok(PlaceholderInsert::AlreadyExists)
        }
    }

    /// Store the response snapshot for later byte-identical replay.
    pub async fn finalize(
        pool: &PgPool,
        scope: &IdempotencyScope,
        status_code: i32,
        response_headers: &serde_json::Value,
        response_body: Option<&[u8]>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE idempotency_keys \
             SET status_code = $6, response_headers = $7, response_body = $8 \
             WHERE tenant_id = $1 AND project_id = $2 \
               AND method = $3 AND path = $4 AND idem_key = $5",
        )
        .bind(scope.tenant_id)
        .bind(scope.project_id)
        .bind(&scope.method)
        .bind(&scope.path)
        .bind(&scope.idem_key)
        .bind(status_code)
        .bind(response_headers)
        .bind(response_body)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop a placeholder whose request failed before producing a response,
    /// so a retry with the same key is not stuck behind it.
    pub async fn release_placeholder(
        pool: &PgPool,
        scope: &IdempotencyScope,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "DELETE FROM idempotency_keys \
             WHERE tenant_id = $1 AND project_id = $2 \
               AND method = $3 AND path = $4 AND idem_key = $5 \
               AND status_code IS NULL",
        )
        .bind(scope.tenant_id)
        .bind(scope.project_id)
        .bind(&scope.method)
        .bind(&scope.path)
        .bind(&scope.idem_key)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete expired records. Returns the number of rows swept.
    pub async fn sweep_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= now()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
