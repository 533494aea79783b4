//! `modelops-core` -- shared domain types for the control plane.
//!
//! This crate has no dependency on the store or the HTTP layer so it can be
//! used by the API service, the workers, and the standalone executor alike.

pub mod error;
pub mod outbound;
pub mod retry;
pub mod scheduling;
pub mod tenancy;
pub mod types;
