//! Repository for the `gpu_jobs` table.
//!
//! Every lifecycle transition is a single row-level conditional `UPDATE`:
//! dispatch is guarded by `status = 'QUEUED'`, executor transitions by the
//! current `dispatch_token`. Zero rows affected means another writer won the
//! race and the caller must skip.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::gpu_job::{
    ClaimedJob, GpuJob, InFlightCount, JobTimestamps, QueuedCandidate, SubmitGpuJob,
};
use crate::models::status::{GpuPool, JobStatus};
use crate::models::tenant_policy::POLICY_DEFAULTS;

/// Column list for `gpu_jobs` queries.
const COLUMNS: &str = "\
    id, tenant_id, project_id, created_by, status, \
    gpu_pool_requested, gpu_pool_assigned, isolation_level, priority, \
    target_url, request_json, response_json, error, \
    dispatch_token, dispatch_attempts, \
    requested_at, dispatched_at, started_at, finished_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 200;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides queue, scheduling, and execution operations for GPU jobs.
pub struct GpuJobRepo;

impl GpuJobRepo {
    /// Insert a new job in `QUEUED` with a server-generated id.
    pub async fn submit(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        created_by: &str,
        input: &SubmitGpuJob,
    ) -> Result<GpuJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO gpu_jobs \
                 (tenant_id, project_id, created_by, status, \
                  gpu_pool_requested, isolation_level, priority, \
                  target_url, request_json) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GpuJob>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(created_by)
            .bind(JobStatus::Queued)
            .bind(input.gpu_pool_requested)
            .bind(input.isolation_level)
            .bind(input.priority)
            .bind(&input.target_url)
            .bind(&input.request_json)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its id, without a tenancy filter (worker-side reads).
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<GpuJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM gpu_jobs WHERE id = $1");
        sqlx::query_as::<_, GpuJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a job within a tenancy scope (API reads).
    pub async fn find_scoped(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<GpuJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM gpu_jobs \
             WHERE tenant_id = $1 AND project_id = $2 AND id = $3"
        );
        sqlx::query_as::<_, GpuJob>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a tenancy scope's jobs, newest first.
    pub async fn list_scoped(
        pool: &PgPool,
        tenant_id: Uuid,
        project_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<GpuJob>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let query = format!(
            "SELECT {COLUMNS} FROM gpu_jobs \
             WHERE tenant_id = $1 AND project_id = $2 \
             ORDER BY requested_at DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, GpuJob>(&query)
            .bind(tenant_id)
            .bind(project_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Count a tenant's `QUEUED` jobs (admission against `max_queued_jobs`).
    pub async fn count_queued(pool: &PgPool, tenant_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM gpu_jobs WHERE tenant_id = $1 AND status = $2")
            .bind(tenant_id)
            .bind(JobStatus::Queued)
            .fetch_one(pool)
            .await
    }

    /// Snapshot in-flight (DISPATCHED + RUNNING) counts grouped by tenant,
    /// assigned pool, and isolation level.
    pub async fn in_flight_counts(pool: &PgPool) -> Result<Vec<InFlightCount>, sqlx::Error> {
        sqlx::query_as::<_, InFlightCount>(
            "SELECT tenant_id, gpu_pool_assigned, isolation_level, COUNT(*) AS count \
             FROM gpu_jobs \
             WHERE status IN ($1, $2) AND gpu_pool_assigned IS NOT NULL \
             GROUP BY tenant_id, gpu_pool_assigned, isolation_level",
        )
        .bind(JobStatus::Dispatched)
        .bind(JobStatus::Running)
        .fetch_all(pool)
        .await
    }

    /// Pull queued candidates in dispatch order, joined with the owning
    /// tenant's policy. Ordering is `(priority + priority_boost) DESC,
    /// requested_at ASC, id ASC`; tenants without a policy row get the
    /// implicit free-plan defaults.
    pub async fn queued_candidates(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<QueuedCandidate>, sqlx::Error> {
        sqlx::query_as::<_, QueuedCandidate>(
            "SELECT j.id, j.tenant_id, j.project_id, \
                    j.gpu_pool_requested, j.isolation_level, \
                    j.priority + COALESCE(p.priority_boost, $2) AS effective_priority, \
                    COALESCE(p.t4_max_concurrency, $3) AS t4_max_concurrency, \
                    COALESCE(p.mig_max_concurrency, $4) AS mig_max_concurrency \
             FROM gpu_jobs j \
             LEFT JOIN tenant_gpu_policies p ON p.tenant_id = j.tenant_id \
             WHERE j.status = $1 \
             ORDER BY effective_priority DESC, j.requested_at ASC, j.id ASC \
             LIMIT $5",
        )
        .bind(JobStatus::Queued)
        .bind(POLICY_DEFAULTS.priority_boost)
        .bind(POLICY_DEFAULTS.t4_max_concurrency)
        .bind(POLICY_DEFAULTS.mig_max_concurrency)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Atomically move a queued job to `DISPATCHED`.
    ///
    /// Returns `false` when another scheduler instance won the race (zero
    /// rows affected); the caller must skip the job.
    pub async fn try_dispatch(
        pool: &PgPool,
        id: Uuid,
        assigned: GpuPool,
        dispatch_token: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE gpu_jobs \
             SET status = $3, \
                 gpu_pool_assigned = $4, \
                 dispatch_token = $5, \
                 dispatch_attempts = dispatch_attempts + 1, \
                 dispatched_at = now(), \
                 updated_at = now() \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(JobStatus::Queued)
        .bind(JobStatus::Dispatched)
        .bind(assigned)
        .bind(dispatch_token)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revert stale `DISPATCHED` jobs with remaining attempts back to
    /// `QUEUED`, clearing the dispatch annotations. Recovers from lost
    /// dispatch events and crashed dispatchers.
    pub async fn requeue_stale_dispatched(
        pool: &PgPool,
        timeout_secs: f64,
        max_attempts: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE gpu_jobs \
             SET status = $2, \
                 gpu_pool_assigned = NULL, \
                 dispatch_token = NULL, \
                 dispatched_at = NULL, \
                 updated_at = now() \
             WHERE status = $1 \
               AND dispatched_at < now() - ($3 * interval '1 second') \
               AND dispatch_attempts < $4",
        )
        .bind(JobStatus::Dispatched)
        .bind(JobStatus::Queued)
        .bind(timeout_secs)
        .bind(max_attempts)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fail stale `DISPATCHED` jobs whose attempts are exhausted.
    pub async fn fail_exhausted_dispatched(
        pool: &PgPool,
        timeout_secs: f64,
        max_attempts: i32,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE gpu_jobs \
             SET status = $2, error = $5, finished_at = now(), updated_at = now() \
             WHERE status = $1 \
               AND dispatched_at < now() - ($3 * interval '1 second') \
               AND dispatch_attempts >= $4",
        )
        .bind(JobStatus::Dispatched)
        .bind(JobStatus::Failed)
        .bind(timeout_secs)
        .bind(max_attempts)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fail `RUNNING` jobs whose executor went stale.
    ///
    /// Stale running jobs are never redispatched, to avoid double billing of
    /// side effects.
    pub async fn fail_stale_running(
        pool: &PgPool,
        timeout_secs: f64,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE gpu_jobs \
             SET status = $2, error = $4, finished_at = now(), updated_at = now() \
             WHERE status = $1 \
               AND started_at < now() - ($3 * interval '1 second')",
        )
        .bind(JobStatus::Running)
        .bind(JobStatus::Failed)
        .bind(timeout_secs)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Atomically claim a dispatched job for execution
    /// (`DISPATCHED -> RUNNING`), guarded by the dispatch token.
    ///
    /// Returns `None` when the token is stale or another executor already
    /// claimed the job; the caller must exit silently.
    pub async fn claim_running(
        pool: &PgPool,
        id: Uuid,
        dispatch_token: Uuid,
    ) -> Result<Option<ClaimedJob>, sqlx::Error> {
        sqlx::query_as::<_, ClaimedJob>(
            "UPDATE gpu_jobs \
             SET status = $3, started_at = now(), updated_at = now() \
             WHERE id = $1 AND status = $2 AND dispatch_token = $4 \
             RETURNING id, tenant_id, project_id, created_by, gpu_pool_assigned, \
                       isolation_level, target_url, request_json",
        )
        .bind(id)
        .bind(JobStatus::Dispatched)
        .bind(JobStatus::Running)
        .bind(dispatch_token)
        .fetch_optional(pool)
        .await
    }

    /// Terminal transition `RUNNING -> SUCCEEDED`, guarded by the dispatch
    /// token. Returns the execution timestamps for metering.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        dispatch_token: Uuid,
        response_json: &serde_json::Value,
    ) -> Result<Option<JobTimestamps>, sqlx::Error> {
        sqlx::query_as::<_, JobTimestamps>(
            "UPDATE gpu_jobs \
             SET status = $3, response_json = $4, finished_at = now(), updated_at = now() \
             WHERE id = $1 AND status = $2 AND dispatch_token = $5 \
             RETURNING started_at, finished_at",
        )
        .bind(id)
        .bind(JobStatus::Running)
        .bind(JobStatus::Succeeded)
        .bind(response_json)
        .bind(dispatch_token)
        .fetch_optional(pool)
        .await
    }

    /// Terminal transition `RUNNING -> FAILED`, guarded by the dispatch token.
    pub async fn fail_running(
        pool: &PgPool,
        id: Uuid,
        dispatch_token: Uuid,
        error: &str,
    ) -> Result<Option<JobTimestamps>, sqlx::Error> {
        sqlx::query_as::<_, JobTimestamps>(
            "UPDATE gpu_jobs \
             SET status = $3, error = $4, finished_at = now(), updated_at = now() \
             WHERE id = $1 AND status = $2 AND dispatch_token = $5 \
             RETURNING started_at, finished_at",
        )
        .bind(id)
        .bind(JobStatus::Running)
        .bind(JobStatus::Failed)
        .bind(error)
        .bind(dispatch_token)
        .fetch_optional(pool)
        .await
    }

    /// Fail a job that never left `DISPATCHED` because its compute unit
    /// could not be launched, guarded by the dispatch token.
    pub async fn fail_dispatched(
        pool: &PgPool,
        id: Uuid,
        dispatch_token: Uuid,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE gpu_jobs \
             SET status = $3, error = $4, finished_at = now(), updated_at = now() \
             WHERE id = $1 AND status = $2 AND dispatch_token = $5",
        )
        .bind(id)
        .bind(JobStatus::Dispatched)
        .bind(JobStatus::Failed)
        .bind(error)
        .bind(dispatch_token)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
