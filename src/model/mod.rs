// Core domain records shared across the orchestration layers
//
// Runs, stage results and study references are plain serializable data;
// all behavior lives in the executor, the queue and the store.

pub mod run;
pub mod stage;
pub mod study;

// Re-export main types for convenient access
pub use run::{RunStatus, WorkflowRun};
pub use stage::{StageError, StageErrorKind, StageOutcome, StageResult};
pub use study::{StudyKind, StudyRef};
