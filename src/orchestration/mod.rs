//! # Orchestration Engine
//!
//! Drives accepted workflow runs from `Pending` to a terminal status.
//!
//! ## Core Components
//!
//! - **PipelineExecutor**: walks a pipeline definition for one run, gating
//!   sequence stages on success, running group branches concurrently with
//!   contained failures, and checking the join barrier against the result
//!   store before finalize
//! - **RunFinalizer**: reads the run's recorded stage results after the
//!   finalize stage settles and decides the terminal run status through the
//!   state machine
//! - **WorkflowSystem**: process-facing facade wiring catalog, registry,
//!   queue, executor and store together; owns submission policy (duplicate
//!   handling, capacity backpressure), status reporting and crash resume
//!
//! Execution-side guarantees (retry with backoff, invocation timeouts, the
//! at-most-one-invocation-per-(run, stage) guard) live in `crate::queue`;
//! this module builds the run-level guarantees on top of them.

pub mod executor;
pub mod finalizer;
pub mod system;

pub use executor::PipelineExecutor;
pub use finalizer::{decide_run_event, FinalizationDecision, RunFinalizer};
pub use system::{RunStatusReport, StageSummary, WorkflowSystem};
