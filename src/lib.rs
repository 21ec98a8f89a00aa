#![allow(clippy::doc_markdown)] // Allow technical terms like SQLite, NIfTI in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dentalflow Core
//!
//! Workflow orchestration core for dental radiographic studies. A staged
//! study (CBCT volume, panoramic image or NIfTI volume) is accepted as a
//! `WorkflowRun` and driven through a fixed pipeline of named stages with
//! retry, timeout and partial-failure semantics, ending in a terminal
//! status a caller can inspect stage by stage.
//!
//! ## Architecture
//!
//! The core separates the **shape** of the work from its **execution**:
//!
//! - a `PipelineDefinition` describes the stage graph per study kind, as a
//!   sequence of stages and parallel branch groups joined before a single
//!   finalize stage
//! - a `StageRegistry` maps stage names to `StageHandler` implementations,
//!   populated at process start
//! - the `InProcessQueue` owns one stage invocation at a time per
//!   (run, stage), with exponential backoff for transient failures and a
//!   wall-clock budget per attempt
//! - the `ResultStore` is the only shared mutable state across branches,
//!   keyed by (run, stage) with first-writer-wins terminal results, and the
//!   SQLite implementation survives restarts so in-flight runs resume
//! - the `PipelineExecutor` walks definitions run by run, enforcing the
//!   join barrier and finalize-exactly-once, and the `WorkflowSystem`
//!   facade fronts submission, status and resume
//!
//! ## Module Organization
//!
//! - [`model`] - WorkflowRun, StageResult and the error taxonomy
//! - [`pipeline`] - stage-graph definitions and the built-in catalog
//! - [`stage`] - handler trait, registry, built-in handlers, collaborators
//! - [`queue`] - work queue binding with retry, backoff and dedup
//! - [`store`] - result store trait, in-memory and SQLite implementations
//! - [`state_machine`] - run status transitions and guards
//! - [`orchestration`] - executor, finalizer and the system facade
//! - [`config`] - YAML configuration with environment overrides
//! - [`events`] - lifecycle event broadcast
//! - [`error`] - top-level error enum
//! - [`logging`] - structured logging bootstrap and log helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dentalflow_core::config::DentalflowConfig;
//! use dentalflow_core::model::{StudyKind, StudyRef};
//! use dentalflow_core::orchestration::WorkflowSystem;
//! use dentalflow_core::stage::{builtin_registry, LocalObjectStore, SliceExporter, StudyAnalyzer};
//! use dentalflow_core::store::InMemoryResultStore;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     analyzer: Arc<dyn StudyAnalyzer>,
//! #     exporter: Arc<dyn SliceExporter>,
//! #     study: StudyRef,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(DentalflowConfig::default());
//! let object_store = Arc::new(LocalObjectStore::new(&config.storage.artifact_root));
//! let registry = Arc::new(builtin_registry(
//!     config.clone(),
//!     analyzer,
//!     exporter,
//!     object_store,
//! ));
//!
//! let system = WorkflowSystem::new(config, registry, Arc::new(InMemoryResultStore::new()))?;
//! let run_id = system.start_workflow(study, StudyKind::Pano).await?;
//! let status = system.await_completion(run_id).await?;
//! println!("run {run_id} finished as {status}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - at most one terminal `StageResult` per (run, stage), under concurrent
//!   duplicate submission included
//! - a sequence never submits stage N+1 unless stage N succeeded
//! - finalize runs exactly once, and only once every declared branch has
//!   reached completion
//! - a failed branch never cancels its siblings and degrades the run to
//!   `PartiallyFailed` at worst; a failed finalize fails the run

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod orchestration;
pub mod pipeline;
pub mod queue;
pub mod stage;
pub mod state_machine;
pub mod store;

pub use error::{DentalflowError, Result};
pub use model::{
    RunStatus, StageError, StageErrorKind, StageOutcome, StageResult, StudyKind, StudyRef,
    WorkflowRun,
};
pub use orchestration::{RunStatusReport, StageSummary, WorkflowSystem};
