//! Repository for the `tenant_gpu_policies` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::tenant_policy::{TenantGpuPolicy, UpsertTenantGpuPolicy, POLICY_DEFAULTS};

const COLUMNS: &str = "\
    tenant_id, plan, t4_max_concurrency, mig_max_concurrency, \
    max_queued_jobs, priority_boost, updated_at";

pub struct TenantPolicyRepo;

impl TenantPolicyRepo {
    pub async fn find(
        pool: &PgPool,
        tenant_id: Uuid,
    ) -> Result<Option<TenantGpuPolicy>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tenant_gpu_policies WHERE tenant_id = $1");
        sqlx::query_as::<_, TenantGpuPolicy>(&query)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    /// Fetch the tenant's policy, materializing the implicit free-plan
    /// default row on first contact.
    pub async fn ensure(pool: &PgPool, tenant_id: Uuid) -> Result<TenantGpuPolicy, sqlx::Error> {
        if let Some(policy) = Self::find(pool, tenant_id).await? {
            return Ok(policy);
        }
        let query = format!(
            "INSERT INTO tenant_gpu_policies (tenant_id) VALUES ($1) \
             ON CONFLICT (tenant_id) DO UPDATE SET tenant_id = EXCLUDED.tenant_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TenantGpuPolicy>(&query)
            .bind(tenant_id)
            .fetch_one(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<TenantGpuPolicy>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tenant_gpu_policies ORDER BY tenant_id");
        sqlx::query_as::<_, TenantGpuPolicy>(&query)
            .fetch_all(pool)
            .await
    }

    /// Upsert a tenant's policy; absent fields fall back to the defaults.
    pub async fn upsert(
        pool: &PgPool,
        tenant_id: Uuid,
        input: &UpsertTenantGpuPolicy,
    ) -> Result<TenantGpuPolicy, sqlx::Error> {
        let query = format!(
            "INSERT INTO tenant_gpu_policies \
                 (tenant_id, plan, t4_max_concurrency, mig_max_concurrency, \
                  max_queued_jobs, priority_boost) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (tenant_id) DO UPDATE SET \
                 plan = EXCLUDED.plan, \
                 t4_max_concurrency = EXCLUDED.t4_max_concurrency, \
                 mig_max_concurrency = EXCLUDED.mig_max_concurrency, \
                 max_queued_jobs = EXCLUDED.max_queued_jobs, \
                 priority_boost = EXCLUDED.priority_boost, \
                 updated_at = now() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TenantGpuPolicy>(&query)
            .bind(tenant_id)
            .bind(input.plan.as_deref().unwrap_or("free"))
            .bind(
                input
                    .t4_max_concurrency
                    .unwrap_or(POLICY_DEFAULTS.t4_max_concurrency),
            )
            .bind(
                input
                    .mig_max_concurrency
                    .unwrap_or(POLICY_DEFAULTS.mig_max_concurrency),
            )
            .bind(
                input
                    .max_queued_jobs
                    .unwrap_or(POLICY_DEFAULTS.max_queued_jobs),
            )
            .bind(
                input
                    .priority_boost
                    .unwrap_or(POLICY_DEFAULTS.priority_boost),
            )
            .fetch_one(pool)
            .await
    }

    /// The effective `max_queued_jobs` for a tenant (implicit default when
    /// no policy row exists).
    pub async fn max_queued_jobs(pool: &PgPool, tenant_id: Uuid) -> Result<i32, sqlx::Error> {
        let value: Option<i32> =
            sqlx::query_scalar("SELECT max_queued_jobs FROM tenant_gpu_policies WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(pool)
                .await?;
        Ok(value.unwrap_or(POLICY_DEFAULTS.max_queued_jobs))
    }
}
