//! Repository for the append-only `usage_ledger` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::usage::UsageRecord;

const COLUMNS: &str = "\
    id, tenant_id, project_id, subject_type, subject_id, meter, quantity, \
    labels, created_at";

pub struct UsageRepo;

impl UsageRepo {
    /// Append one metering row. Returns the generated id.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        subject_type: &str,
        subject_id: Uuid,
        meter: &str,
        quantity: f64,
        labels: &serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO usage_ledger \
                 (tenant_id, project_id, subject_type, subject_id, meter, quantity, labels) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(tenant_id)
        .bind(project_id)
        .bind(subject_type)
        .bind(subject_id)
        .bind(meter)
        .bind(quantity)
        .bind(labels)
        .fetch_one(pool)
        .await
    }

    /// All ledger rows for a subject, oldest first.
    pub async fn list_for_subject(
        pool: &PgPool,
        subject_type: &str,
        subject_id: Uuid,
    ) -> Result<Vec<UsageRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM usage_ledger \
             WHERE subject_type = $1 AND subject_id = $2 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, UsageRecord>(&query)
            .bind(subject_type)
            .bind(subject_id)
            .fetch_all(pool)
            .await
    }
}
