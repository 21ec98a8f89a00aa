//! # Stage Invocation Messages
//!
//! The message format the executor submits to the work queue. One message
//! describes one stage invocation request for a run; retry bookkeeping
//! lives in the metadata so the queue can enforce the attempt budget
//! without consulting the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{BackoffConfig, ExecutionConfig};
use crate::model::{StudyKind, StudyRef};

/// Request to invoke one stage of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMessage {
    /// Run the stage belongs to
    pub run_id: Uuid,
    /// Stage name within the pipeline
    pub stage: String,
    /// Pipeline kind, used to select validation rules and storage layout
    pub pipeline: StudyKind,
    /// Study under processing
    pub study: StudyRef,
    /// Message metadata
    pub metadata: StageMessageMetadata,
}

/// Metadata for stage messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMessageMetadata {
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Total invocation attempts allowed, including the first
    pub max_attempts: u32,
    /// Wall-clock budget per attempt in milliseconds
    pub timeout_ms: u64,
    /// Correlation ID for tracking
    pub correlation_id: Option<String>,
}

impl Default for StageMessageMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            max_attempts: 3,
            timeout_ms: 30000,
            correlation_id: Some(Uuid::new_v4().to_string()),
        }
    }
}

impl StageMessageMetadata {
    /// Snapshot the attempt budget and timeout from configuration
    pub fn from_config(execution: &ExecutionConfig, backoff: &BackoffConfig) -> Self {
        Self {
            max_attempts: backoff.max_attempts.max(1),
            timeout_ms: execution.default_stage_timeout_seconds * 1000,
            ..Self::default()
        }
    }
}

impl StageMessage {
    /// Create a new stage message with default metadata
    pub fn new(run_id: Uuid, stage: impl Into<String>, pipeline: StudyKind, study: StudyRef) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            pipeline,
            study,
            metadata: StageMessageMetadata::default(),
        }
    }

    /// Create a stage message with custom metadata
    pub fn with_metadata(
        run_id: Uuid,
        stage: impl Into<String>,
        pipeline: StudyKind,
        study: StudyRef,
        metadata: StageMessageMetadata,
    ) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            pipeline,
            study,
            metadata,
        }
    }

    /// Per-attempt timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.metadata.timeout_ms)
    }

    /// Whether the given attempt number exhausts the budget
    pub fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.metadata.max_attempts.max(1)
    }

    /// Message age in milliseconds
    pub fn age_ms(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.metadata.created_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
