//! Message kinds exchanged between the control plane and the workers.
//!
//! Explicit sum types dispatched through `match` — the control channel
//! carries cheap bookkeeping messages, the worker channel carries only
//! evaluate requests (the expensive part).

use std::time::Duration;

use crate::domain::protocol::MutationSignal;
use crate::domain::request::ObserverId;

/// Messages handled by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A storage table changed; look up dependent observers and
    /// dispatch evaluations.
    Mutation(MutationSignal),
    /// Schedule a poll-mode wakeup: sleep `interval`, then dispatch an
    /// evaluation through the throttle.
    SchedulePoll {
        /// Observer to re-evaluate.
        observer: ObserverId,
        /// Poll interval.
        interval: Duration,
    },
    /// Dispatch one evaluation through the throttle (poll wakeups and
    /// other internally generated requests).
    Evaluate {
        /// Observer to evaluate.
        observer: ObserverId,
    },
    /// The single deferred evaluation of a throttle window; goes to
    /// the workers directly, bypassing the throttle.
    Deferred {
        /// Observer to evaluate.
        observer: ObserverId,
    },
}

/// Messages handled by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Re-execute the observer's handler, diff and notify.
    Evaluate {
        /// Observer to evaluate.
        observer: ObserverId,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::protocol::MutationKind;

    #[test]
    fn control_messages_are_comparable() {
        let signal = MutationSignal {
            table: "papers".to_string(),
            kind: MutationKind::Create,
            primary_key: Some("1".to_string()),
        };
        assert_eq!(
            ControlMessage::Mutation(signal.clone()),
            ControlMessage::Mutation(signal)
        );
    }

    #[test]
    fn worker_message_carries_observer_id() {
        let observer = ObserverId::from_string("a".repeat(64));
        let WorkerMessage::Evaluate { observer: id } = WorkerMessage::Evaluate {
            observer: observer.clone(),
        };
        assert_eq!(id, observer);
    }
}
