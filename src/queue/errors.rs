//! Error types for work queue operations

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Errors that can occur during queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("No handler registered for stage '{stage}'")]
    HandlerNotFound { stage: String },

    #[error("Invocation channel closed before a result for run {run_id} stage '{stage}'")]
    ChannelClosed { run_id: Uuid, stage: String },

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn handler_not_found(stage: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            stage: stage.into(),
        }
    }

    pub fn channel_closed(run_id: Uuid, stage: impl Into<String>) -> Self {
        Self::ChannelClosed {
            run_id,
            stage: stage.into(),
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
