//! # Crate Error Types
//!
//! Top-level error enum returned by the orchestration facade, with
//! conversions from each subsystem's own error type.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::pipeline::PipelineError;
use crate::queue::QueueError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum DentalflowError {
    #[error("No pipeline registered for study kind: {kind}")]
    UnknownPipeline { kind: String },

    #[error("No handler registered for stage: {stage}")]
    UnknownStage { stage: String },

    #[error("Workflow run not found: {run_id}")]
    RunNotFound { run_id: Uuid },

    #[error("Study {study_id} already has an active run: {run_id}")]
    DuplicateRun { study_id: String, run_id: Uuid },

    #[error("Work queue at capacity: {active} active runs, limit is {capacity}")]
    QueueFull { active: usize, capacity: usize },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Pipeline definition error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("Work queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal orchestration error: {message}")]
    Internal { message: String },
}

impl DentalflowError {
    pub fn unknown_pipeline(kind: impl Into<String>) -> Self {
        Self::UnknownPipeline { kind: kind.into() }
    }

    pub fn unknown_stage(stage: impl Into<String>) -> Self {
        Self::UnknownStage {
            stage: stage.into(),
        }
    }

    pub fn run_not_found(run_id: Uuid) -> Self {
        Self::RunNotFound { run_id }
    }

    pub fn duplicate_run(study_id: impl Into<String>, run_id: Uuid) -> Self {
        Self::DuplicateRun {
            study_id: study_id.into(),
            run_id,
        }
    }

    pub fn queue_full(active: usize, capacity: usize) -> Self {
        Self::QueueFull { active, capacity }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller can retry the triggering request as-is
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

impl From<serde_json::Error> for DentalflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, DentalflowError>;
