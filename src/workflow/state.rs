//! Action and Run State
//!
//! Lifecycle bookkeeping for every node of a workflow run.
//!
//! Node states only move forward:
//!
//! ```text
//! PENDING ──> SCHEDULED ──> RUNNING ──> SUCCEEDED | FAILED | CANCELLED
//!    │            │
//!    │            └──> FAILED | CANCELLED
//!    └──> SKIPPED | CANCELLED | FAILED
//! ```
//!
//! A terminal state is never left.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::model::ActionSpec;
use crate::error::ActionError;

/// Lifecycle state of a single action node.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns true for states that are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true while the node holds a concurrency slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    /// Checks whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;

        matches!(
            (self, next),
            (Pending, Scheduled | Skipped | Cancelled | Failed)
                | (Scheduled, Running | Failed | Cancelled)
                | (Running, Succeeded | Failed | Cancelled)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall state of a run.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Initializing,
    Running,
    /// Every node succeeded or was skipped and none failed
    Completed,
    /// At least one node failed or was cancelled
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal transition for action '{action}': {from} -> {to}")]
pub struct TransitionError {
    pub action: String,
    pub from: ActionState,
    pub to: ActionState,
}

/// Runtime record of one declared action.
#[derive(Debug, Clone)]
pub struct ActionNode {
    spec: ActionSpec,
    state: ActionState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    outcomes: BTreeMap<String, String>,
    error: Option<ActionError>,
}

impl ActionNode {
    /// Creates a PENDING node for the given declaration.
    pub fn new(spec: ActionSpec) -> Self {
        Self {
            spec,
            state: ActionState::Pending,
            started_at: None,
            finished_at: None,
            outcomes: BTreeMap::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Outcomes produced by the action. Empty unless it succeeded.
    pub fn outcomes(&self) -> &BTreeMap<String, String> {
        &self.outcomes
    }

    pub fn error(&self) -> Option<&ActionError> {
        self.error.as_ref()
    }

    /// Moves the node forward, stamping start and finish times.
    pub(crate) fn transition(&mut self, next: ActionState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                action: self.spec.name.clone(),
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        if next == ActionState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.state = next;
        Ok(())
    }

    /// Marks the node SUCCEEDED with the outcomes it produced.
    pub(crate) fn succeed(
        &mut self,
        outcomes: BTreeMap<String, String>,
    ) -> Result<(), TransitionError> {
        self.transition(ActionState::Succeeded)?;
        self.outcomes = outcomes;
        Ok(())
    }

    /// Marks the node FAILED with its cause.
    pub(crate) fn fail(&mut self, error: ActionError) -> Result<(), TransitionError> {
        self.transition(ActionState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Marks the node CANCELLED.
    pub(crate) fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(ActionState::Cancelled)?;
        self.error = Some(ActionError::Cancelled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> ActionNode {
        ActionNode::new(ActionSpec::new("build", "echo"))
    }

    #[test]
    fn test_node_starts_pending() {
        let node = node();
        assert_eq!(node.state(), ActionState::Pending);
        assert!(node.started_at().is_none());
        assert!(node.outcomes().is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut node = node();
        node.transition(ActionState::Scheduled).unwrap();
        node.transition(ActionState::Running).unwrap();
        assert!(node.started_at().is_some());

        let outcomes = BTreeMap::from([("k".to_string(), "v".to_string())]);
        node.succeed(outcomes).unwrap();

        assert_eq!(node.state(), ActionState::Succeeded);
        assert_eq!(node.outcomes()["k"], "v");
        assert!(node.finished_at().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut node = node();
        node.transition(ActionState::Skipped).unwrap();

        let err = node.transition(ActionState::Scheduled).unwrap_err();
        assert_eq!(err.from, ActionState::Skipped);
        assert_eq!(err.to, ActionState::Scheduled);
        assert!(node.cancel().is_err());
        assert_eq!(node.state(), ActionState::Skipped);
    }

    #[test]
    fn test_pending_cannot_run_directly() {
        let mut node = node();
        assert!(node.transition(ActionState::Running).is_err());
        assert!(node.succeed(BTreeMap::new()).is_err());
    }

    #[test]
    fn test_failure_before_start_records_error() {
        let mut node = node();
        node.fail(ActionError::OutcomeResolution("missing".into()))
            .unwrap();

        assert_eq!(node.state(), ActionState::Failed);
        assert!(node.started_at().is_none());
        assert!(matches!(node.error(), Some(ActionError::OutcomeResolution(_))));
    }

    #[test]
    fn test_state_classification() {
        assert!(ActionState::Cancelled.is_terminal());
        assert!(!ActionState::Running.is_terminal());
        assert!(ActionState::Scheduled.is_in_flight());
        assert!(!ActionState::Pending.is_in_flight());
        assert_eq!(ActionState::Succeeded.to_string(), "SUCCEEDED");
        assert!(RunState::Completed.is_success());
        assert!(!RunState::Failed.is_success());
    }
}
