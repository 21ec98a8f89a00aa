//! # Result Store
//!
//! Keyed, append-only record of run and stage outcomes. The store holds at
//! most one current result per (run, stage) pair: `Retrying` markers are
//! superseded in place, and the first terminal write wins. Later terminal
//! writes for the same key are rejected, which is what makes duplicate
//! stage invocations harmless.
//!
//! Two backends: an in-memory store for tests and non-durable deployments,
//! and a SQLite store that survives process restart so in-flight runs can
//! be resumed.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{RunStatus, StageOutcome, StageResult, WorkflowRun};
use crate::pipeline::Branch;

pub use memory::InMemoryResultStore;
pub use sqlite::SqliteResultStore;

/// Result store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Database migration error: {message}")]
    Migration { message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Workflow run not found: {run_id}")]
    RunNotFound { run_id: Uuid },
}

impl StoreError {
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
        }
    }

    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn run_not_found(run_id: Uuid) -> Self {
        Self::RunNotFound { run_id }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::database_query("query", "No rows found"),
            sqlx::Error::Database(db_err) => {
                StoreError::database_query("database", db_err.to_string())
            }
            sqlx::Error::PoolTimedOut => StoreError::timeout("database_pool", 30),
            sqlx::Error::PoolClosed => {
                StoreError::database_connection("Database pool is closed")
            }
            sqlx::Error::Configuration(config_err) => {
                StoreError::database_connection(config_err.to_string())
            }
            _ => StoreError::database_connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a `record` call
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The result was written (or superseded a `Retrying` marker)
    Recorded,
    /// A terminal result already exists for this (run, stage); the write was
    /// rejected and the existing result is returned
    AlreadyTerminal(Box<StageResult>),
}

impl RecordOutcome {
    pub fn was_recorded(&self) -> bool {
        matches!(self, Self::Recorded)
    }
}

/// Persistence boundary for workflow runs and stage results
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a newly created run
    async fn create_run(&self, run: &WorkflowRun) -> StoreResult<()>;

    /// Fetch a run by identifier
    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>>;

    /// Persist a run status change; sets `completed_at` on terminal status
    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> StoreResult<()>;

    /// Find the active (non-terminal) run for a study, if any
    async fn find_active_run_for_study(&self, study_id: &str) -> StoreResult<Option<WorkflowRun>>;

    /// All runs whose status is not terminal, oldest first
    async fn list_active_runs(&self) -> StoreResult<Vec<WorkflowRun>>;

    /// Number of active runs, used for submission backpressure
    async fn count_active_runs(&self) -> StoreResult<usize>;

    /// Record a stage result. Terminal results are first-writer-wins;
    /// `Retrying` markers are superseded in place.
    async fn record(&self, result: &StageResult) -> StoreResult<RecordOutcome>;

    /// Current result per stage for a run, ordered by completion time then
    /// stage name
    async fn read_all(&self, run_id: Uuid) -> StoreResult<Vec<StageResult>>;

    /// Current result for one (run, stage) pair
    async fn get_stage_result(
        &self,
        run_id: Uuid,
        stage: &str,
    ) -> StoreResult<Option<StageResult>>;

    /// Whether a branch has reached completion: its last stage is terminal,
    /// or an earlier stage short-circuited it with a terminal failure
    async fn is_branch_complete(&self, run_id: Uuid, branch: &Branch) -> StoreResult<bool> {
        let results = self.read_all(run_id).await?;
        Ok(branch_is_complete(&results, branch))
    }

    /// Delete terminal runs (and their stage results) whose completion is
    /// older than the retention window. Returns the number of runs removed.
    async fn prune_expired(&self, retention: Duration) -> StoreResult<u64>;
}

/// Branch completion over a run's current results
pub(crate) fn branch_is_complete(results: &[StageResult], branch: &Branch) -> bool {
    for stage in &branch.stages {
        match results.iter().find(|r| &r.stage == stage) {
            Some(result) if result.outcome == StageOutcome::Failure => return true,
            Some(result) if result.is_terminal() => continue,
            // Pending or still retrying: everything after it is undecided
            _ => return false,
        }
    }
    true
}
