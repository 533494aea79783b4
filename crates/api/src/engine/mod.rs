//! Event-driven engine loops hosted by the API process.
//!
//! Each submodule provides a long-running async worker spawned from `main`
//! via `tokio::spawn`. All loops accept a [`CancellationToken`] for
//! graceful shutdown and share the process-wide store pool and event bus.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod deploy;
pub mod dispatcher;
pub mod scheduler;

/// How a processed bus delivery should be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}
