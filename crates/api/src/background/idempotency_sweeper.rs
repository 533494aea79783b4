//! TTL sweeper for idempotency records.
//!
//! Expired records are already invisible to lookups; the sweeper just keeps
//! the table from growing without bound.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use modelops_db::repositories::IdempotencyRepo;

pub struct IdempotencySweeper {
    pool: PgPool,
    interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Idempotency sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Idempotency sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match IdempotencyRepo::sweep_expired(&self.pool).await {
                        Ok(0) => {}
                        Ok(swept) => tracing::info!(swept, "Expired idempotency records removed"),
                        Err(e) => tracing::error!(error = %e, "Idempotency sweep failed"),
                    }
                }
            }
        }
    }
}
