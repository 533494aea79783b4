use std::sync::Arc;

use modelops_events::EventBus;

use crate::config::AppConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already
/// `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: modelops_db::DbPool,
    /// Service configuration (read by middleware, handlers, and engine).
    pub config: Arc<AppConfig>,
    /// Shared event bus feeding the dispatch and deploy consumers.
    pub bus: Arc<EventBus>,
}
