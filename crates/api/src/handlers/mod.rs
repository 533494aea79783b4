pub mod deployments;
pub mod gpu_jobs;
pub mod health;
pub mod policies;
