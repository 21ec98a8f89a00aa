//! # Stage Execution Building Blocks
//!
//! A stage is one named unit of work inside a pipeline. This module holds
//! the pieces the work queue composes per invocation: the [`StageHandler`]
//! trait and its invocation context, the process-wide [`StageRegistry`],
//! the external collaborator traits and the built-in handlers for the
//! shipped catalog.

pub mod builtin;
pub mod collaborators;
pub mod handler;
pub mod registry;

pub use builtin::builtin_registry;
pub use collaborators::{
    LocalObjectStore, ObjectStore, SliceExporter, SliceSummary, StoredObject, StudyAnalyzer,
};
pub use handler::{StageContext, StageHandler};
pub use registry::StageRegistry;
