use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::study::{StudyKind, StudyRef};

/// Workflow run state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run accepted but no stage submitted yet
    Pending,
    /// At least one stage has been submitted
    Running,
    /// Every stage and the finalizer succeeded
    Succeeded,
    /// Finalizer ran with at least one failed branch in view
    PartiallyFailed,
    /// Uncontained failure, or the finalizer itself failed
    Failed,
}

impl RunStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyFailed | Self::Failed)
    }

    /// Check if this is an active state (run is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Check if this state carries failed stages
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::PartiallyFailed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::PartiallyFailed => write!(f, "partially_failed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "partially_failed" => Ok(Self::PartiallyFailed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// One execution of a pipeline definition against one study.
///
/// Created when a study is accepted for processing. Status is mutated only
/// by the executor as stages complete and becomes immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub study: StudyRef,
    pub pipeline: StudyKind,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, when the run reaches a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Create a new pending run for the given study
    pub fn new(study: StudyRef, pipeline: StudyKind) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            study,
            pipeline,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Age of the run in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_study() -> StudyRef {
        StudyRef {
            study_id: "study-9".to_string(),
            clinic_id: "clinic-3".to_string(),
            patient_id: "patient-7".to_string(),
            staged_path: PathBuf::from("/tmp/staged/study-9.nii.gz"),
            original_filename: "study-9.nii.gz".to_string(),
            size_bytes: 2048,
        }
    }

    #[test]
    fn test_run_status_terminal_check() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::PartiallyFailed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_run_status_active_check() {
        assert!(RunStatus::Pending.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::Succeeded.is_active());
        assert!(!RunStatus::Failed.is_active());
    }

    #[test]
    fn test_run_status_string_conversion() {
        assert_eq!(RunStatus::PartiallyFailed.to_string(), "partially_failed");
        assert_eq!(
            "partially_failed".parse::<RunStatus>().unwrap(),
            RunStatus::PartiallyFailed
        );
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_status_serde() {
        let json = serde_json::to_string(&RunStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RunStatus::Running);
    }

    #[test]
    fn test_new_run_starts_pending() {
        let run = WorkflowRun::new(sample_study(), StudyKind::Cbct);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.completed_at.is_none());
        assert_eq!(run.pipeline, StudyKind::Cbct);
    }
}
