//! # Run State Machine
//!
//! Explicit transition rules for workflow run status. The executor derives
//! the target state here before persisting it, so every status change goes
//! through one checked table and terminal states can never be mutated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RunStatus;

/// State machine error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// Events that can trigger run state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    /// First stage submitted
    Start,
    /// Finalize succeeded with every branch successful
    CompleteSuccessfully,
    /// Finalize succeeded with at least one failed branch in view
    CompletePartially,
    /// Uncontained failure or finalize failure, with error message
    Fail(String),
}

impl RunEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::CompleteSuccessfully => "complete_successfully",
            Self::CompletePartially => "complete_partially",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Start)
    }
}

/// Determine the target state based on current state and event
pub fn determine_target_state(
    current: RunStatus,
    event: &RunEvent,
) -> StateMachineResult<RunStatus> {
    let target = match (current, event) {
        (RunStatus::Pending, RunEvent::Start) => RunStatus::Running,

        (RunStatus::Running, RunEvent::CompleteSuccessfully) => RunStatus::Succeeded,
        (RunStatus::Running, RunEvent::CompletePartially) => RunStatus::PartiallyFailed,

        // A run can fail before its first stage is submitted
        (RunStatus::Pending, RunEvent::Fail(_)) => RunStatus::Failed,
        (RunStatus::Running, RunEvent::Fail(_)) => RunStatus::Failed,

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}
