pub mod idempotency;
pub mod tenancy;
