//! `modelops-executor` library crate.
//!
//! The runner is shared by the direct-mode dispatcher (in-process execution)
//! and the standalone binary launched inside ephemeral compute units. The
//! binary entrypoint lives in `main.rs`.

pub mod runner;

pub use runner::{run_job, Behavior, Outcome, RunnerConfig};
