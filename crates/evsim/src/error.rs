//! Error types for the simulation kernel.
//!
//! Only recoverable conditions are represented here. Invariant violations
//! (time moving backwards, a corrupted event arena) panic instead.

use crate::clock::SimTime;

/// Errors that can occur while scheduling or running a simulation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// An event was scheduled at an absolute time that has already passed.
    #[error("deadline {deadline} is before the current time {now}")]
    DeadlineInPast {
        /// The current simulation time.
        now: SimTime,
        /// The requested deadline.
        deadline: SimTime,
    },

    /// The simulation exceeded its configured limits.
    #[error("simulation limit exceeded: {kind}")]
    LimitExceeded {
        /// What limit was exceeded.
        kind: LimitKind,
    },

    /// The simulator behind a weak reference no longer exists.
    #[error("simulator has been dropped")]
    SimulatorDropped,
}

/// Kind of limit that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Maximum number of processed events exceeded.
    Events,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Events => write!(f, "max_events"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SimError::DeadlineInPast {
            now: SimTime::from_secs(2),
            deadline: SimTime::from_secs(1),
        };
        assert_eq!(
            err.to_string(),
            "deadline 1.000000000s is before the current time 2.000000000s"
        );

        let err = SimError::LimitExceeded {
            kind: LimitKind::Events,
        };
        assert!(err.to_string().contains("max_events"));

        assert_eq!(
            SimError::SimulatorDropped.to_string(),
            "simulator has been dropped"
        );
    }
}
