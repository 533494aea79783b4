//! Repository for the `endpoints` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::endpoint::{CreateEndpoint, Endpoint, UpdateEndpoint};
use crate::models::status::EndpointStatus;

const COLUMNS: &str = "\
    id, tenant_id, project_id, name, status, url, error, runtime, \
    model_version_id, artifact_uri, traffic, autoscaling, runtime_config, \
    created_by, created_at, updated_at";

const MAX_LIMIT: i64 = 200;
const DEFAULT_LIMIT: i64 = 50;

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

pub struct EndpointRepo;

impl EndpointRepo {
    /// Insert a new intent in `CREATING`. A duplicate name within the
    /// tenancy scope violates `uq_endpoints_name`.
    pub async fn create(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        created_by: &str,
        input: &CreateEndpoint,
    ) -> Result<Endpoint, sqlx::Error> {
        let query = format!(
            "INSERT INTO endpoints \
                 (tenant_id, project_id, name, status, runtime, \
                  model_version_id, artifact_uri, traffic, autoscaling, runtime_config, \
                  created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Endpoint>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(&input.name)
            .bind(EndpointStatus::Creating)
            .bind(input.runtime.as_deref().unwrap_or("kserve"))
            .bind(input.model_version_id)
            .bind(&input.artifact_uri)
            .bind(input.traffic.clone().unwrap_or_else(empty_object))
            .bind(input.autoscaling.clone().unwrap_or_else(empty_object))
            .bind(input.runtime_config.clone().unwrap_or_else(empty_object))
            .bind(created_by)
            .fetch_one(pool)
            .await
    }

    /// Find an intent by id, without a tenancy filter (worker-side reads).
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Endpoint>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM endpoints WHERE id = $1");
        sqlx::query_as::<_, Endpoint>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_scoped(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Endpoint>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM endpoints \
             WHERE tenant_id = $1 AND project_id = $2 AND id = $3"
        );
        sqlx::query_as::<_, Endpoint>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a tenancy scope's intents, newest first. Soft-deleted rows are
    /// excluded unless `include_deleted`.
    pub async fn list_scoped(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        limit: Option<i64>,
        include_deleted: bool,
    ) -> Result<Vec<Endpoint>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let deleted_filter = if include_deleted {
            ""
        } else {
            "AND status <> 'DELETED'"
        };
        let query = format!(
            "SELECT {COLUMNS} FROM endpoints \
             WHERE tenant_id = $1 AND project_id = $2 {deleted_filter} \
             ORDER BY created_at DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Endpoint>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Apply a partial update. `reset_to_creating` also moves the intent
    /// back to `CREATING` so the deploy worker re-reconciles it.
    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        id: Uuid,
        input: &UpdateEndpoint,
        reset_to_creating: bool,
    ) -> Result<Option<Endpoint>, sqlx::Error> {
        let mut sets: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 4;
        let mut next = |column: &str, sets: &mut Vec<String>| {
            sets.push(format!("{column} = ${bind_idx}"));
            bind_idx += 1;
        };

        if input.name.is_some() {
            next("name", &mut sets);
        }
        if input.runtime.is_some() {
            next("runtime", &mut sets);
        }
        if input.model_version_id.is_some() {
            next("model_version_id", &mut sets);
        }
        if input.artifact_uri.is_some() {
            next("artifact_uri", &mut sets);
        }
        if input.traffic.is_some() {
            next("traffic", &mut sets);
        }
        if input.autoscaling.is_some() {
            next("autoscaling", &mut sets);
        }
        if input.runtime_config.is_some() {
            next("runtime_config", &mut sets);
        }
        if reset_to_creating {
            sets.push("status = 'CREATING'".to_string());
            sets.push("error = NULL".to_string());
        }
        sets.push("updated_at = now()".to_string());

        let set_sql = sets.join(", ");
        let query = format!(
            "UPDATE endpoints SET {set_sql} \
             WHERE tenant_id = $1 AND project_id = $2 AND id = $3 \
             RETURNING {COLUMNS}"
        );

        let mut q = sqlx::query_as::<_, Endpoint>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(id);
        if let Some(v) = &input.name {
            q = q.bind(v);
        }
        if let Some(v) = &input.runtime {
            q = q.bind(v);
        }
        if let Some(v) = input.model_version_id {
            q = q.bind(v);
        }
        if let Some(v) = &input.artifact_uri {
            q = q.bind(v);
        }
        if let Some(v) = &input.traffic {
            q = q.bind(v);
        }
        if let Some(v) = &input.autoscaling {
            q = q.bind(v);
        }
        if let Some(v) = &input.runtime_config {
            q = q.bind(v);
        }

        q.fetch_optional(pool).await
    }

    /// Set the lifecycle status, optionally recording a URL or error detail.
    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: EndpointStatus,
        url: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE endpoints \
             SET status = $2, url = COALESCE($3, url), error = $4, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(url)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete: rename the row to release the `uq_endpoints_name`
    /// uniqueness constraint and mark it `DELETED`.
    pub async fn mark_deleted(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE endpoints \
             SET status = $2, \
                 url = NULL, \
                 name = name || '.deleted.' || left(id::text, 8), \
                 updated_at = now() \
             WHERE id = $1 AND status <> $2",
        )
        .bind(id)
        .bind(EndpointStatus::Deleted)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
