use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{RunStatus, StageOutcome, StudyKind};

/// Lifecycle events emitted while a workflow run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: Uuid,
        study_id: String,
        pipeline: StudyKind,
    },
    StageStarted {
        run_id: Uuid,
        stage: String,
        attempt: u32,
    },
    StageRetrying {
        run_id: Uuid,
        stage: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    StageCompleted {
        run_id: Uuid,
        stage: String,
        outcome: StageOutcome,
    },
    JoinSatisfied {
        run_id: Uuid,
        branches: Vec<String>,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

impl WorkflowEvent {
    /// Stable event name for log correlation
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StageStarted { .. } => "stage_started",
            Self::StageRetrying { .. } => "stage_retrying",
            Self::StageCompleted { .. } => "stage_completed",
            Self::JoinSatisfied { .. } => "join_satisfied",
            Self::RunCompleted { .. } => "run_completed",
        }
    }

    /// Run this event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StageStarted { run_id, .. }
            | Self::StageRetrying { run_id, .. }
            | Self::StageCompleted { run_id, .. }
            | Self::JoinSatisfied { run_id, .. }
            | Self::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        let run_id = Uuid::new_v4();
        let event = WorkflowEvent::StageCompleted {
            run_id,
            stage: "analyze".to_string(),
            outcome: StageOutcome::Success,
        };
        assert_eq!(event.name(), "stage_completed");
        assert_eq!(event.run_id(), run_id);
    }

    #[test]
    fn test_event_serde_tagging() {
        let event = WorkflowEvent::RunCompleted {
            run_id: Uuid::new_v4(),
            status: RunStatus::PartiallyFailed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "run_completed");
        assert_eq!(json["status"], "partially_failed");
    }
}
