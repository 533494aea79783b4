//! `modelops-api` -- the control-plane service.
//!
//! One process hosts the HTTP surface (jobs, deployments, policies), the
//! scheduler loop, the dispatch consumers, the deploy worker, and the
//! idempotency sweeper, all sharing one store pool and one event bus.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
