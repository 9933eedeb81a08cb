// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Coordinator built, nothing dispatched.
    Created,
    /// Workers are being dispatched or watched.
    Running,
    /// A stop was requested (signal or stop-on-error).
    Stopping,
    /// The per-instance time limit was crossed.
    TimedOut,
    /// All workers finished and every result was collected.
    Drained,
}

impl RunState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunState::Running | RunState::Stopping | RunState::TimedOut
        )
    }

    pub(crate) fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Running, Stopping)
                | (Running, TimedOut)
                | (Running, Drained)
                | (Stopping, TimedOut)
                | (Stopping, Drained)
                | (TimedOut, Drained)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => write!(f, "created"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
            RunState::TimedOut => write!(f, "timed-out"),
            RunState::Drained => write!(f, "drained"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Drained));
        assert!(Running.can_transition_to(TimedOut));
        assert!(TimedOut.can_transition_to(Drained));
        assert!(Stopping.can_transition_to(Drained));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!Created.can_transition_to(Drained));
        assert!(!Drained.can_transition_to(Running));
        assert!(!TimedOut.can_transition_to(Stopping));
        assert!(!Created.can_transition_to(Stopping));
    }

    #[test]
    fn test_is_active() {
        assert!(!Created.is_active());
        assert!(Running.is_active());
        assert!(TimedOut.is_active());
        assert!(!Drained.is_active());
        assert_eq!(TimedOut.to_string(), "timed-out");
    }
}
