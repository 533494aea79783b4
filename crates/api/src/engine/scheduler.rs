//! GPU job scheduler.
//!
//! A single logical writer of `QUEUED -> DISPATCHED`, run as a periodic
//! background task. Multiple replicas are safe: the transition commits
//! through a row-level conditional update, so a lost race simply skips.
//!
//! Each tick reclaims orphans first, snapshots capacity in one grouped
//! query, then walks queued candidates in
//! `(priority + priority_boost) DESC, requested_at ASC, id ASC` order,
//! admitting each against global slots, the T4 isolation interlock, and the
//! owning tenant's concurrency caps.

use std::collections::HashMap;

use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use modelops_core::scheduling::{ERROR_DISPATCH_TIMEOUT, ERROR_EXECUTOR_TIMEOUT};
use modelops_db::models::gpu_job::{InFlightCount, QueuedCandidate};
use modelops_db::models::status::{GpuPool, GpuPoolRequest, IsolationLevel};
use modelops_db::repositories::GpuJobRepo;
use modelops_events::messages::DispatchMessage;
use modelops_events::{Event, EventBus, Subject};

use crate::config::SchedulerConfig;

/// What one tick did; returned for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub requeued: u64,
    pub failed_dispatch_timeout: u64,
    pub failed_executor_timeout: u64,
    pub dispatched: u64,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        *self == TickReport::default()
    }
}

/// Periodic scheduling loop.
pub struct Scheduler {
    pool: PgPool,
    bus: Arc<EventBus>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(pool: PgPool, bus: Arc<EventBus>, config: SchedulerConfig) -> Self {
        Self { pool, bus, config }
    }

    /// Run the scheduling loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        tracing::info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            t4_shared_slots = self.config.t4_shared_slots,
            t4_exclusive_slots = self.config.t4_exclusive_slots,
            mig_total_slots = self.config.mig_total_slots,
            "Scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if !report.is_quiet() => {
                            tracing::info!(
                                dispatched = report.dispatched,
                                requeued = report.requeued,
                                failed_dispatch_timeout = report.failed_dispatch_timeout,
                                failed_executor_timeout = report.failed_executor_timeout,
                                "Scheduler tick",
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Scheduler tick failed"),
                    }
                }
            }
        }
    }

    /// One idempotent scheduling pass. Re-reads all state from the store;
    /// a crash mid-tick leaves the store consistent because every dispatch
    /// is its own atomic step.
    pub async fn tick(&self) -> Result<TickReport, sqlx::Error> {
        let mut report = TickReport::default();
        let timeout_secs = self.config.dispatch_timeout.as_secs_f64();

        // Step 0: orphan reclaim. Requeue recoverable orphans, fail the
        // exhausted ones, and fail stuck RUNNING jobs (never redispatched).
        report.requeued = GpuJobRepo::requeue_stale_dispatched(
            &self.pool,
            timeout_secs,
            self.config.max_dispatch_attempts,
        )
        .await?;
        report.failed_dispatch_timeout = GpuJobRepo::fail_exhausted_dispatched(
            &self.pool,
            timeout_secs,
            self.config.max_dispatch_attempts,
            ERROR_DISPATCH_TIMEOUT,
        )
        .await?;
        report.failed_executor_timeout = GpuJobRepo::fail_stale_running(
            &self.pool,
            self.config.execution_timeout.as_secs_f64(),
            ERROR_EXECUTOR_TIMEOUT,
        )
        .await?;

        // Steps 1-2: capacity snapshot.
        let counts = GpuJobRepo::in_flight_counts(&self.pool).await?;
        let mut capacity = Capacity::new(&self.config, &counts);

        // Step 4: candidates in dispatch order.
        let candidates =
            GpuJobRepo::queued_candidates(&self.pool, self.config.candidate_batch).await?;

        for candidate in candidates {
            // Steps 2-3: slot availability and the T4 isolation interlock,
            // checked before per-tenant admission.
            let Some(pool) = capacity.resolve_pool(&candidate) else {
                continue;
            };

            // Step 5: per-tenant admission. A capped tenant's job does not
            // block the candidates behind it.
            if !capacity.tenant_has_headroom(&candidate, pool) {
                continue;
            }

            // Step 6: atomic dispatch. Zero rows affected means another
            // replica won the race.
            let token = Uuid::new_v4();
            if !GpuJobRepo::try_dispatch(&self.pool, candidate.id, pool, token).await? {
                continue;
            }
            capacity.commit(&candidate, pool);
            report.dispatched += 1;

            let subject =
                Subject::dispatched(pool.as_str(), candidate.isolation_level.as_str());
            self.bus.publish(Event::from_message(
                subject,
                &DispatchMessage {
                    tenant_id: candidate.tenant_id,
                    project_id: candidate.project_id,
                    job_id: candidate.id,
                    dispatch_token: token,
                },
            ));

            tracing::info!(
                job_id = %candidate.id,
                tenant_id = %candidate.tenant_id,
                pool = pool.as_str(),
                isolation = candidate.isolation_level.as_str(),
                effective_priority = candidate.effective_priority,
                subject = %subject,
                "Job dispatched",
            );
        }

        Ok(report)
    }
}

/// Local view of slot capacity for one tick. Seeded from the store snapshot
/// and decremented as dispatches commit, so a single tick cannot oversubscribe.
struct Capacity {
    t4_shared_slots: i64,
    t4_exclusive_slots: i64,
    mig_slots: i64,
    t4_shared_in_flight: i64,
    t4_exclusive_in_flight: i64,
    mig_in_flight: i64,
    per_tenant: HashMap<(Uuid, GpuPool), i64>,
}

impl Capacity {
    fn new(config: &SchedulerConfig, counts: &[InFlightCount]) -> Self {
        let mut capacity = Self {
            t4_shared_slots: config.t4_shared_slots,
            t4_exclusive_slots: config.t4_exclusive_slots,
            mig_slots: config.mig_total_slots,
            t4_shared_in_flight: 0,
            t4_exclusive_in_flight: 0,
            mig_in_flight: 0,
            per_tenant: HashMap::new(),
        };
        for count in counts {
            match (count.gpu_pool_assigned, count.isolation_level) {
                (GpuPool::Mig, _) => capacity.mig_in_flight += count.count,
                (GpuPool::T4, IsolationLevel::Shared) => {
                    capacity.t4_shared_in_flight += count.count;
                }
                (GpuPool::T4, IsolationLevel::Exclusive) => {
                    capacity.t4_exclusive_in_flight += count.count;
                }
            }
            *capacity
                .per_tenant
                .entry((count.tenant_id, count.gpu_pool_assigned))
                .or_insert(0) += count.count;
        }
        capacity
    }

    fn mig_available(&self) -> bool {
        self.mig_in_flight < self.mig_slots
    }

    /// Soft exclusivity: shared and exclusive T4 jobs never overlap. The
    /// interlock is symmetric and applies before any per-tenant check.
    fn t4_available(&self, isolation: IsolationLevel) -> bool {
        match isolation {
            IsolationLevel::Shared => {
                self.t4_exclusive_in_flight == 0 && self.t4_shared_in_flight < self.t4_shared_slots
            }
            IsolationLevel::Exclusive => {
                self.t4_shared_in_flight == 0
                    && self.t4_exclusive_in_flight < self.t4_exclusive_slots
            }
        }
    }

    /// Resolve the candidate's requested pool to a concrete pool with a free
    /// slot, or `None` to skip it this tick. `auto` prefers MIG when MIG
    /// slots are configured, falling back to T4.
    fn resolve_pool(&self, candidate: &QueuedCandidate) -> Option<GpuPool> {
        match candidate.gpu_pool_requested {
            GpuPoolRequest::T4 => self
                .t4_available(candidate.isolation_level)
                .then_some(GpuPool::T4),
            GpuPoolRequest::Mig => self.mig_available().then_some(GpuPool::Mig),
            GpuPoolRequest::Auto => {
                if self.mig_slots > 0 && self.mig_available() {
                    Some(GpuPool::Mig)
                } else if self.t4_available(candidate.isolation_level) {
                    Some(GpuPool::T4)
                } else {
                    None
                }
            }
        }
    }

    fn tenant_has_headroom(&self, candidate: &QueuedCandidate, pool: GpuPool) -> bool {
        let cap = match pool {
            GpuPool::T4 => candidate.t4_max_concurrency,
            GpuPool::Mig => candidate.mig_max_concurrency,
        };
        let in_flight = self
            .per_tenant
            .get(&(candidate.tenant_id, pool))
            .copied()
            .unwrap_or(0);
        in_flight < i64::from(cap)
    }

    fn commit(&mut self, candidate: &QueuedCandidate, pool: GpuPool) {
        match (pool, candidate.isolation_level) {
            (GpuPool::Mig, _) => self.mig_in_flight += 1,
            (GpuPool::T4, IsolationLevel::Shared) => self.t4_shared_in_flight += 1,
            (GpuPool::T4, IsolationLevel::Exclusive) => self.t4_exclusive_in_flight += 1,
        }
        *self
            .per_tenant
            .entry((candidate.tenant_id, pool))
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(shared: i64, exclusive: i64, mig: i64) -> SchedulerConfig {
        SchedulerConfig {
            t4_shared_slots: shared,
            t4_exclusive_slots: exclusive,
            mig_total_slots: mig,
            tick_interval: Duration::from_millis(500),
            dispatch_timeout: Duration::from_secs(120),
            execution_timeout: Duration::from_secs(600),
            max_dispatch_attempts: 3,
            candidate_batch: 100,
        }
    }

    fn candidate(
        tenant: Uuid,
        requested: GpuPoolRequest,
        isolation: IsolationLevel,
        t4_cap: i32,
        mig_cap: i32,
    ) -> QueuedCandidate {
        QueuedCandidate {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            project_id: Uuid::new_v4(),
            gpu_pool_requested: requested,
            isolation_level: isolation,
            effective_priority: 0,
            t4_max_concurrency: t4_cap,
            mig_max_concurrency: mig_cap,
        }
    }

    fn in_flight(
        tenant: Uuid,
        pool: GpuPool,
        isolation: IsolationLevel,
        count: i64,
    ) -> InFlightCount {
        InFlightCount {
            tenant_id: tenant,
            gpu_pool_assigned: pool,
            isolation_level: isolation,
            count,
        }
    }

    #[test]
    fn exclusive_in_flight_blocks_shared() {
        let tenant = Uuid::new_v4();
        let capacity = Capacity::new(
            &config(8, 1, 0),
            &[in_flight(tenant, GpuPool::T4, IsolationLevel::Exclusive, 1)],
        );
        let shared = candidate(tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 10, 0);
        assert_eq!(capacity.resolve_pool(&shared), None);
    }

    #[test]
    fn shared_in_flight_blocks_exclusive() {
        let tenant = Uuid::new_v4();
        let capacity = Capacity::new(
            &config(8, 1, 0),
            &[in_flight(tenant, GpuPool::T4, IsolationLevel::Shared, 1)],
        );
        let exclusive = candidate(tenant, GpuPoolRequest::T4, IsolationLevel::Exclusive, 10, 0);
        assert_eq!(capacity.resolve_pool(&exclusive), None);
    }

    #[test]
    fn committing_a_shared_job_locks_out_exclusive_within_the_tick() {
        let mut capacity = Capacity::new(&config(8, 1, 0), &[]);
        let tenant = Uuid::new_v4();
        let shared = candidate(tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 10, 0);
        let exclusive = candidate(tenant, GpuPoolRequest::T4, IsolationLevel::Exclusive, 10, 0);

        assert_eq!(capacity.resolve_pool(&exclusive), Some(GpuPool::T4));
        assert_eq!(capacity.resolve_pool(&shared), Some(GpuPool::T4));
        capacity.commit(&shared, GpuPool::T4);
        assert_eq!(capacity.resolve_pool(&exclusive), None);
    }

    #[test]
    fn shared_slots_cap_global_concurrency() {
        let tenant = Uuid::new_v4();
        let capacity = Capacity::new(
            &config(2, 1, 0),
            &[in_flight(tenant, GpuPool::T4, IsolationLevel::Shared, 2)],
        );
        let shared = candidate(tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 10, 0);
        assert_eq!(capacity.resolve_pool(&shared), None);
    }

    #[test]
    fn auto_prefers_mig_when_slots_exist() {
        let capacity = Capacity::new(&config(8, 1, 2), &[]);
        let auto = candidate(
            Uuid::new_v4(),
            GpuPoolRequest::Auto,
            IsolationLevel::Shared,
            1,
            1,
        );
        assert_eq!(capacity.resolve_pool(&auto), Some(GpuPool::Mig));
    }

    #[test]
    fn auto_falls_back_to_t4_without_mig_slots() {
        let capacity = Capacity::new(&config(8, 1, 0), &[]);
        let auto = candidate(
            Uuid::new_v4(),
            GpuPoolRequest::Auto,
            IsolationLevel::Shared,
            1,
            1,
        );
        assert_eq!(capacity.resolve_pool(&auto), Some(GpuPool::T4));
    }

    #[test]
    fn auto_falls_back_to_t4_when_mig_is_saturated() {
        let tenant = Uuid::new_v4();
        let capacity = Capacity::new(
            &config(8, 1, 1),
            &[in_flight(tenant, GpuPool::Mig, IsolationLevel::Shared, 1)],
        );
        let auto = candidate(tenant, GpuPoolRequest::Auto, IsolationLevel::Shared, 1, 1);
        assert_eq!(capacity.resolve_pool(&auto), Some(GpuPool::T4));
    }

    #[test]
    fn explicit_mig_request_waits_when_no_slots() {
        let capacity = Capacity::new(&config(8, 1, 0), &[]);
        let mig = candidate(
            Uuid::new_v4(),
            GpuPoolRequest::Mig,
            IsolationLevel::Shared,
            1,
            1,
        );
        assert_eq!(capacity.resolve_pool(&mig), None);
    }

    #[test]
    fn tenant_caps_are_per_pool() {
        let tenant = Uuid::new_v4();
        let mut capacity = Capacity::new(&config(8, 1, 2), &[]);
        let t4_job = candidate(tenant, GpuPoolRequest::T4, IsolationLevel::Shared, 1, 1);

        assert!(capacity.tenant_has_headroom(&t4_job, GpuPool::T4));
        capacity.commit(&t4_job, GpuPool::T4);
        assert!(!capacity.tenant_has_headroom(&t4_job, GpuPool::T4));

        // The T4 dispatch does not consume the tenant's MIG headroom.
        let mig_job = candidate(tenant, GpuPoolRequest::Mig, IsolationLevel::Shared, 1, 1);
        assert!(capacity.tenant_has_headroom(&mig_job, GpuPool::Mig));
    }

    #[test]
    fn capped_tenant_does_not_block_others() {
        let capped = Uuid::new_v4();
        let other = Uuid::new_v4();
        let capacity = Capacity::new(
            &config(8, 1, 0),
            &[in_flight(capped, GpuPool::T4, IsolationLevel::Shared, 1)],
        );

        let capped_job = candidate(capped, GpuPoolRequest::T4, IsolationLevel::Shared, 1, 0);
        let other_job = candidate(other, GpuPoolRequest::T4, IsolationLevel::Shared, 1, 0);

        assert!(!capacity.tenant_has_headroom(&capped_job, GpuPool::T4));
        assert!(capacity.tenant_has_headroom(&other_job, GpuPool::T4));
    }
}
