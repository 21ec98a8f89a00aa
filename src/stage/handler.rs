//! # Stage Handler Framework
//!
//! ## Architecture: Registry-Driven Stage Execution
//!
//! A stage handler is the body of one task unit: given a context carrying
//! the study reference and the results of upstream stages, it performs one
//! unit of work and returns a success payload or a classified error.
//! Handlers must be safe to re-invoke with the same context: the work
//! queue retries transient failures, so side effects are keyed writes
//! rather than appends.
//!
//! ## Key Components:
//!
//! - **StageContext**: study, attempt number and upstream results for one
//!   invocation
//! - **StageHandler**: the async extension point, one implementation per
//!   stage name
//! - **Error Classification**: handlers return `StageError` with the
//!   transient/permanent distinction decided at the point of failure

use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{StageError, StageResult, StudyKind, StudyRef};

/// Stage execution context containing all information needed for one
/// invocation
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Run this invocation belongs to
    pub run_id: Uuid,

    /// Stage name being executed
    pub stage: String,

    /// The study under processing
    pub study: StudyRef,

    /// Pipeline kind the run was started with
    pub pipeline: StudyKind,

    /// Current attempt number, 1-based
    pub attempt: u32,

    /// Current results of every stage that has already reported, keyed by
    /// stage name. For the finalize stage this is the full result view,
    /// failures included.
    pub upstream: HashMap<String, StageResult>,
}

impl StageContext {
    /// Result of an upstream stage, if it has reported
    pub fn upstream_result(&self, stage: &str) -> Option<&StageResult> {
        self.upstream.get(stage)
    }

    /// Success payload of an upstream stage, if it succeeded
    pub fn upstream_payload(&self, stage: &str) -> Option<&serde_json::Value> {
        self.upstream
            .get(stage)
            .filter(|result| result.is_success())
            .and_then(|result| result.payload.as_ref())
    }

    /// Object-storage prefix for this run's artifacts:
    /// `{clinic}/{patient}/{kind}/{run}`
    pub fn artifact_prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.study.clinic_id, self.study.patient_id, self.pipeline, self.run_id
        )
    }
}

/// Base stage handler trait for stage implementations
#[async_trait::async_trait]
pub trait StageHandler: Send + Sync {
    /// Process the stage - this is the main extension point
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError>;

    /// Per-stage wall-clock budget override - optional extension point
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
}
