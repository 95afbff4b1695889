//! Invocation and pipeline run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Created but no attempt has started.
    Pending,
    /// An attempt is executing.
    Running,
    /// An attempt failed and another is scheduled after backoff.
    Retrying,
    /// Finished with a value.
    Succeeded,
    /// Finished with an error; the retry budget is spent or the error was final.
    Failed,
}

impl Default for InvocationState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl InvocationState {
    /// Returns true if the state can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Retrying)
                | (Self::Retrying, Self::Running)
        )
    }
}

/// Aggregate status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not finished.
    Running,
    /// Some children succeeded and some failed.
    PartiallySucceeded,
    /// Every child succeeded.
    Succeeded,
    /// Every child failed, or the application body itself failed.
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::PartiallySucceeded => write!(f, "partially_succeeded"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Computes the aggregate status from child outcome counts.
    ///
    /// A run with no children is considered successful.
    #[must_use]
    pub fn from_counts(successful: usize, failed: usize) -> Self {
        match (successful, failed) {
            (_, 0) => Self::Succeeded,
            (0, _) => Self::Failed,
            _ => Self::PartiallySucceeded,
        }
    }

    /// Returns true once the run has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_state_display() {
        assert_eq!(InvocationState::Pending.to_string(), "pending");
        assert_eq!(InvocationState::Retrying.to_string(), "retrying");
        assert_eq!(InvocationState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_invocation_state_is_terminal() {
        assert!(InvocationState::Succeeded.is_terminal());
        assert!(InvocationState::Failed.is_terminal());
        assert!(!InvocationState::Pending.is_terminal());
        assert!(!InvocationState::Running.is_terminal());
        assert!(!InvocationState::Retrying.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        use InvocationState::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        use InvocationState::*;

        for next in [Pending, Running, Retrying, Succeeded, Failed] {
            assert!(!Succeeded.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(!Retrying.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Succeeded));
    }

    #[test]
    fn test_run_status_from_counts() {
        assert_eq!(RunStatus::from_counts(4, 0), RunStatus::Succeeded);
        assert_eq!(RunStatus::from_counts(3, 1), RunStatus::PartiallySucceeded);
        assert_eq!(RunStatus::from_counts(0, 2), RunStatus::Failed);
        assert_eq!(RunStatus::from_counts(0, 0), RunStatus::Succeeded);
    }

    #[test]
    fn test_run_status_serialize() {
        let json = serde_json::to_string(&RunStatus::PartiallySucceeded).unwrap();
        assert_eq!(json, r#""partially_succeeded""#);

        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::PartiallySucceeded);
    }
}
