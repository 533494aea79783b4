//! End-to-end scheduling scenarios driven tick by tick against a real
//! database: tenant concurrency caps, the T4 exclusivity interlock,
//! priority ordering, global slot caps, and orphan recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use modelops_api::engine::scheduler::Scheduler;
use modelops_db::models::gpu_job::SubmitGpuJob;
use modelops_db::models::status::{GpuPool, GpuPoolRequest, IsolationLevel, JobStatus};
use modelops_db::models::tenant_policy::UpsertTenantGpuPolicy;
use modelops_db::models::usage::{METER_GPU_SECONDS, SUBJECT_GPU_JOB};
use modelops_db::repositories::{GpuJobRepo, TenantPolicyRepo, UsageRepo};
use modelops_events::{EventBus, Subject};
use modelops_executor::{run_job, Behavior, Outcome, RunnerConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn runner() -> RunnerConfig {
    RunnerConfig {
        behavior: Behavior::Simulate,
        http_timeout: Duration::from_secs(1),
        simulate_duration: Duration::ZERO,
    }
}

fn scheduler(pool: &PgPool, bus: &Arc<EventBus>, shared: i64, exclusive: i64, mig: i64) -> Scheduler {
    Scheduler::new(
        pool.clone(),
        Arc::clone(bus),
        common::scheduler_config(shared, exclusive, mig),
    )
}

async fn set_policy(pool: &PgPool, tenant: Uuid, t4: i32, mig: i32, boost: i32) {
    TenantPolicyRepo::upsert(
        pool,
        tenant,
        &UpsertTenantGpuPolicy {
            plan: None,
            t4_max_concurrency: Some(t4),
            mig_max_concurrency: Some(mig),
            max_queued_jobs: None,
            priority_boost: Some(boost),
        },
    )
    .await
    .unwrap();
}

async fn submit(
    pool: &PgPool,
    tenant: Uuid,
    requested: GpuPoolRequest,
    isolation: IsolationLevel,
    priority: i32,
) -> Uuid {
    GpuJobRepo::submit(
        pool,
        tenant,
        Uuid::new_v4(),
        "user-1",
        &SubmitGpuJob {
            gpu_pool_requested: requested,
            isolation_level: isolation,
            priority,
            target_url: "http://serving.internal/predict".to_string(),
            request_json: json!({"inputs": [1]}),
        },
    )
    .await
    .unwrap()
    .id
}

async fn status_of(pool: &PgPool, id: Uuid) -> JobStatus {
    GpuJobRepo::find_by_id(pool, id).await.unwrap().unwrap().status
}

/// Run the executor against a dispatched job using its current token.
async fn execute(pool: &PgPool, id: Uuid) {
    let token = GpuJobRepo::find_by_id(pool, id)
        .await
        .unwrap()
        .unwrap()
        .dispatch_token
        .expect("job must be dispatched");
    let outcome = run_job(pool, None, &runner(), id, token).await.unwrap();
    assert_eq!(outcome, Outcome::Succeeded);
}

async fn backdate_dispatch(pool: &PgPool, id: Uuid, secs: f64) {
    sqlx::query(
        "UPDATE gpu_jobs SET dispatched_at = now() - ($2 * interval '1 second') WHERE id = $1",
    )
    .bind(id)
    .bind(secs)
    .execute(pool)
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario 1: happy path on shared T4 with a tenant concurrency cap of 2
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn happy_path_t4_shared(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 2, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let sub = bus.subscribe(Subject::DispatchedT4Shared, "test");
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let mut jobs = Vec::new();
    for _ in 0..3 {
        jobs.push(submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await);
    }

    // First tick: the tenant cap admits two jobs; the third stays queued.
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.dispatched, 2);
    assert_eq!(status_of(&pool, jobs[0]).await, JobStatus::Dispatched);
    assert_eq!(status_of(&pool, jobs[1]).await, JobStatus::Dispatched);
    assert_eq!(status_of(&pool, jobs[2]).await, JobStatus::Queued);

    // The dispatch events carry the tokens the rows hold.
    let events = sub.fetch(10, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 2);
    for event in events {
        let payload = &event.event().payload;
        let job_id: Uuid = payload["job_id"].as_str().unwrap().parse().unwrap();
        let token: Uuid = payload["dispatch_token"].as_str().unwrap().parse().unwrap();
        let row = GpuJobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
        assert_eq!(row.dispatch_token, Some(token));
        event.ack();
    }

    // A tick with the cap saturated admits nothing.
    assert_eq!(scheduler.tick().await.unwrap().dispatched, 0);

    // One job finishes; the third dispatches on the next tick.
    execute(&pool, jobs[0]).await;
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(status_of(&pool, jobs[2]).await, JobStatus::Dispatched);

    execute(&pool, jobs[1]).await;
    execute(&pool, jobs[2]).await;

    for id in &jobs {
        assert_eq!(status_of(&pool, *id).await, JobStatus::Succeeded);
        let usage = UsageRepo::list_for_subject(&pool, SUBJECT_GPU_JOB, *id)
            .await
            .unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].meter, METER_GPU_SECONDS);
    }
}

// ---------------------------------------------------------------------------
// Scenario 2: exclusivity interlock on T4
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn exclusive_job_blocks_shared_until_terminal(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 5, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let exclusive =
        submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Exclusive, 0).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, exclusive).await, JobStatus::Dispatched);

    let shared = submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, shared).await, JobStatus::Queued);

    execute(&pool, exclusive).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, shared).await, JobStatus::Dispatched);
}

#[sqlx::test(migrations = "../../migrations")]
async fn shared_jobs_block_exclusive(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 5, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let shared = submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, shared).await, JobStatus::Dispatched);

    let exclusive =
        submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Exclusive, 0).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, exclusive).await, JobStatus::Queued);

    execute(&pool, shared).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, exclusive).await, JobStatus::Dispatched);
}

// ---------------------------------------------------------------------------
// Scenario 3: priority ordering with one free slot
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn higher_priority_dispatches_first(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 1, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let low = submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;
    let high = submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 10).await;

    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, high).await, JobStatus::Dispatched);
    assert_eq!(status_of(&pool, low).await, JobStatus::Queued);

    execute(&pool, high).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, low).await, JobStatus::Dispatched);
}

#[sqlx::test(migrations = "../../migrations")]
async fn priority_boost_reorders_tenants(pool: PgPool) {
    let plain = Uuid::new_v4();
    let boosted = Uuid::new_v4();
    set_policy(&pool, plain, 1, 0, 0).await;
    set_policy(&pool, boosted, 1, 0, 50).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 1, 1, 0);

    let plain_job = submit(&pool, plain, GpuPoolRequest::T4, IsolationLevel::Shared, 10).await;
    let boosted_job = submit(&pool, boosted, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;

    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, boosted_job).await, JobStatus::Dispatched);
    assert_eq!(status_of(&pool, plain_job).await, JobStatus::Queued);
}

// ---------------------------------------------------------------------------
// Global slot caps and pools
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn global_shared_slots_bound_dispatches(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 10, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 2, 1, 0);

    for _ in 0..3 {
        submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;
    }

    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.dispatched, 2);

    let counts = GpuJobRepo::in_flight_counts(&pool).await.unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].count, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn auto_jobs_land_on_mig_when_slots_exist(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 1, 2, 0).await;

    let bus = Arc::new(EventBus::new());
    let sub = bus.subscribe(Subject::DispatchedMig, "test");
    let scheduler = scheduler(&pool, &bus, 8, 1, 2);

    let auto = submit(&pool, tenant, GpuPoolRequest::Auto, IsolationLevel::Shared, 0).await;
    scheduler.tick().await.unwrap();

    let job = GpuJobRepo::find_by_id(&pool, auto).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Dispatched);
    assert_eq!(job.gpu_pool_assigned, Some(GpuPool::Mig));

    let events = sub.fetch(1, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn mig_requests_wait_forever_without_mig_slots(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 5, 5, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let mig = submit(&pool, tenant, GpuPoolRequest::Mig, IsolationLevel::Shared, 0).await;
    scheduler.tick().await.unwrap();
    assert_eq!(status_of(&pool, mig).await, JobStatus::Queued);
}

// ---------------------------------------------------------------------------
// Scenario 4: orphan recovery and attempt exhaustion
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn orphaned_dispatches_requeue_then_fail(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 5, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let id = submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;

    // Three dispatch attempts, each orphaned past DISPATCH_TIMEOUT.
    for attempt in 1..=3 {
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.dispatched, 1, "attempt {attempt} should dispatch");
        let job = GpuJobRepo::find_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.dispatch_attempts, attempt);
        backdate_dispatch(&pool, id, 240.0).await;
    }

    // Attempts are exhausted: the next tick fails the job instead of
    // requeueing it.
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.failed_dispatch_timeout, 1);
    assert_eq!(report.dispatched, 0);

    let job = GpuJobRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("dispatch_timeout"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn requeued_orphan_redispatches_with_a_fresh_token(pool: PgPool) {
    let tenant = Uuid::new_v4();
    set_policy(&pool, tenant, 5, 0, 0).await;

    let bus = Arc::new(EventBus::new());
    let scheduler = scheduler(&pool, &bus, 8, 1, 0);

    let id = submit(&pool, tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 0).await;
    scheduler.tick().await.unwrap();
    let first_token = GpuJobRepo::find_by_id(&pool, id)
        .await
        .unwrap()
        .unwrap()
        .dispatch_token
        .unwrap();

    backdate_dispatch(&pool, id, 240.0).await;
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.dispatched, 1);

    let job = GpuJobRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    let second_token = job.dispatch_token.unwrap();
    assert_ne!(first_token, second_token);

    // The superseded token can no longer move the job.
    assert!(GpuJobRepo::claim_running(&pool, id, first_token)
        .await
        .unwrap()
        .is_none());
    assert!(GpuJobRepo::claim_running(&pool, id, second_token)
        .await
        .unwrap()
        .is_some());
}
