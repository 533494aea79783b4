//! Event subjects.
//!
//! Subjects partition the bus: delivery is FIFO within one subject and
//! unordered across subjects.

use serde::{Deserialize, Serialize};

/// All subjects events are published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// A GPU job was accepted into the queue (informational; the scheduler
    /// polls the store, so loss does not break correctness).
    Enqueued,
    /// A queued shared-T4 job was handed to a dispatcher.
    DispatchedT4Shared,
    /// A queued exclusive-T4 job was handed to a dispatcher.
    DispatchedT4Exclusive,
    /// A queued MIG job was handed to a dispatcher.
    DispatchedMig,
    /// An endpoint intent needs (re-)reconciling into a serving resource.
    DeployRequested,
    /// An endpoint intent was deleted and its serving resource must go.
    DeleteRequested,
    /// The executor appended a metering row for a finished job.
    UsageRecorded,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Enqueued => "enqueued",
            Subject::DispatchedT4Shared => "dispatched.t4.shared",
            Subject::DispatchedT4Exclusive => "dispatched.t4.exclusive",
            Subject::DispatchedMig => "dispatched.mig",
            Subject::DeployRequested => "deploy_requested",
            Subject::DeleteRequested => "delete_requested",
            Subject::UsageRecorded => "usage_recorded",
        }
    }

    /// The dispatch subject for an assigned pool and isolation level.
    /// MIG is hard-partitioned, so its subject carries no isolation segment.
    pub fn dispatched(pool: &str, isolation: &str) -> Self {
        match (pool, isolation) {
            ("mig", _) => Subject::DispatchedMig,
            (_, "exclusive") => Subject::DispatchedT4Exclusive,
            _ => Subject::DispatchedT4Shared,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_subject_per_pool_and_isolation() {
        assert_eq!(
            Subject::dispatched("t4", "shared"),
            Subject::DispatchedT4Shared
        );
        assert_eq!(
            Subject::dispatched("t4", "exclusive"),
            Subject::DispatchedT4Exclusive
        );
        assert_eq!(Subject::dispatched("mig", "shared"), Subject::DispatchedMig);
        assert_eq!(
            Subject::dispatched("mig", "exclusive"),
            Subject::DispatchedMig
        );
    }

    #[test]
    fn subject_names_are_stable() {
        assert_eq!(Subject::Enqueued.as_str(), "enqueued");
        assert_eq!(Subject::DispatchedT4Shared.as_str(), "dispatched.t4.shared");
        assert_eq!(Subject::DeployRequested.as_str(), "deploy_requested");
        assert_eq!(Subject::UsageRecorded.as_str(), "usage_recorded");
    }
}
