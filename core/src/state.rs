use std::fmt;

use node_core_types::ExecutionError;

/// §3, §4.4: the five states a node moves through. Ordered by `rank`
/// so the state machine can tell "moving up" from "moving down"
/// without a match over every pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Creating,
    Suspended,
    Idle,
    Running,
    Error,
}

impl NodeState {
    /// Relative ordering used by the lifecycle controller to decide
    /// whether a request moves the node up or down the chain (§4.4).
    /// `Error` ranks above `Running` only so comparisons against it are
    /// well-defined; it is never reached by "moving up".
    pub fn rank(self) -> u8 {
        match self {
            NodeState::Creating => 0,
            NodeState::Suspended => 1,
            NodeState::Idle => 2,
            NodeState::Running => 3,
            NodeState::Error => 4,
        }
    }

    /// §4.4 edge case: pausing a node that is already at or below
    /// `Idle` is a no-op, not a command round-trip.
    pub fn pause_is_noop(self) -> bool {
        self.rank() <= NodeState::Idle.rank()
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Creating => "creating",
            NodeState::Suspended => "suspended",
            NodeState::Idle => "idle",
            NodeState::Running => "running",
            NodeState::Error => "error",
        };
        f.write_str(s)
    }
}

/// §4.4: `Creating` is an internal-only state no request may target.
/// Every other transition, including self-transitions, is legal — the
/// controller decides what work (if any) a transition implies.
pub fn validate_request(target: NodeState) -> Result<(), ExecutionError> {
    if target == NodeState::Creating {
        return Err(ExecutionError::InvalidState);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_is_rejected_as_a_request_target() {
        assert!(matches!(
            validate_request(NodeState::Creating),
            Err(ExecutionError::InvalidState)
        ));
    }

    #[test]
    fn every_other_state_is_a_legal_target() {
        for s in [
            NodeState::Suspended,
            NodeState::Idle,
            NodeState::Running,
            NodeState::Error,
        ] {
            assert!(validate_request(s).is_ok());
        }
    }

    #[test]
    fn pause_is_noop_below_idle_only() {
        assert!(NodeState::Suspended.pause_is_noop());
        assert!(NodeState::Idle.pause_is_noop());
        assert!(!NodeState::Running.pause_is_noop());
        assert!(!NodeState::Error.pause_is_noop());
    }

    #[test]
    fn rank_is_monotonic_through_the_happy_path() {
        assert!(NodeState::Creating.rank() < NodeState::Suspended.rank());
        assert!(NodeState::Suspended.rank() < NodeState::Idle.rank());
        assert!(NodeState::Idle.rank() < NodeState::Running.rank());
    }
}
