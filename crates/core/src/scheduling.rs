//! GPU job scheduling constants and state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by the
//! API/repository layer, the scheduler, and the standalone executor.

// ---------------------------------------------------------------------------
// Capacity defaults
// ---------------------------------------------------------------------------

/// Default concurrent shared T4 slots for the cluster. Must match the
/// device-plugin time-slicing replica count.
pub const DEFAULT_T4_SHARED_SLOTS: i64 = 8;

/// Default concurrent exclusive T4 slots (usually 1).
pub const DEFAULT_T4_EXCLUSIVE_SLOTS: i64 = 1;

/// Default concurrent MIG slots (0 = no MIG partitions offered).
pub const DEFAULT_MIG_TOTAL_SLOTS: i64 = 0;

/// Default number of dispatch attempts before a job fails permanently.
pub const DEFAULT_MAX_DISPATCH_ATTEMPTS: i32 = 3;

/// Well-known error string written when dispatch attempts are exhausted.
pub const ERROR_DISPATCH_TIMEOUT: &str = "dispatch_timeout";

/// Well-known error string written when a running executor goes stale.
pub const ERROR_EXECUTOR_TIMEOUT: &str = "executor_timeout";

/// Well-known error string written when an ephemeral unit cannot be launched.
pub const ERROR_DISPATCH_LAUNCH_FAILED: &str = "dispatch_launch_failed";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Job status transitions over the wire-level status strings.
///
/// The typed `JobStatus` enum lives in the `db` crate with the row models;
/// the state machine is kept here on raw strings because `core` must have
/// zero internal deps.
pub mod state_machine {
    /// Returns the set of valid target statuses reachable from `from`.
    ///
    /// Terminal states (SUCCEEDED, FAILED) return an empty slice because no
    /// further transitions are allowed.
    pub fn valid_transitions(from: &str) -> &'static [&'static str] {
        match from {
            // QUEUED -> DISPATCHED (scheduler) or FAILED (attempts exhausted)
            "QUEUED" => &["DISPATCHED", "FAILED"],
            // DISPATCHED -> RUNNING (executor claim), QUEUED (orphan
            // reclaim), FAILED (launch failure / attempts exhausted)
            "DISPATCHED" => &["RUNNING", "QUEUED", "FAILED"],
            // RUNNING -> terminal only; stale RUNNING is failed, never
            // redispatched, to avoid double billing of side effects.
            "RUNNING" => &["SUCCEEDED", "FAILED"],
            "SUCCEEDED" | "FAILED" => &[],
            _ => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: &str, to: &str) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: &str, to: &str) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {from} -> {to}"))
        }
    }
}
