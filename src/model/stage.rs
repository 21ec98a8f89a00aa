//! # Stage Results
//!
//! The per-stage outcome record shared by the work queue, the result store
//! and the executor. At most one terminal result may exist per
//! (run, stage) pair; `Retrying` entries are transient markers that a
//! later attempt supersedes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome of one stage invocation within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage produced its payload
    Success,
    /// Stage exhausted retries or failed permanently
    Failure,
    /// Attempt failed but the retry budget is not exhausted
    Retrying,
}

impl StageOutcome {
    /// Terminal outcomes are immutable once recorded
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

impl std::str::FromStr for StageOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "retrying" => Ok(Self::Retrying),
            _ => Err(format!("Invalid stage outcome: {s}")),
        }
    }
}

/// Classification of a stage failure, decided at the point of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Retryable with backoff (network or storage hiccup, busy AI service,
    /// wall-clock timeout)
    Transient,
    /// Unrecoverable for this run (malformed input, validation failure)
    Permanent,
    /// The finalizer could not produce the terminal artifact
    Aggregation,
}

impl StageErrorKind {
    /// Whether the work queue may re-invoke the stage for this kind
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Aggregation => write!(f, "aggregation"),
        }
    }
}

/// Error detail attached to a failed or retrying stage result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn aggregation(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Aggregation,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for StageError {}

/// The recorded outcome of one stage within one workflow run.
///
/// `payload` is stage-specific output, opaque to the executor; `error` is
/// present iff the outcome is `Failure` or `Retrying`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub run_id: Uuid,
    pub stage: String,
    pub outcome: StageOutcome,
    pub payload: Option<serde_json::Value>,
    pub error: Option<StageError>,
    /// 1-based attempt number that produced this result
    pub attempt: u32,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn success(
        run_id: Uuid,
        stage: impl Into<String>,
        payload: serde_json::Value,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            outcome: StageOutcome::Success,
            payload: Some(payload),
            error: None,
            attempt,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(run_id: Uuid, stage: impl Into<String>, error: StageError, attempt: u32) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            outcome: StageOutcome::Failure,
            payload: None,
            error: Some(error),
            attempt,
            completed_at: Utc::now(),
        }
    }

    pub fn retrying(
        run_id: Uuid,
        stage: impl Into<String>,
        error: StageError,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            outcome: StageOutcome::Retrying,
            payload: None,
            error: Some(error),
            attempt,
            completed_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Success
    }

    /// Error kind for status reporting, if this result carries an error
    pub fn error_kind(&self) -> Option<StageErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
