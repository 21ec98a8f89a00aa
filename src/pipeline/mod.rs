// Pipeline topology: definitions, builder validation and the built-in
// catalog instantiated once at process start.

pub mod catalog;
pub mod definition;

// Re-export main types for convenient access
pub use catalog::{PipelineCatalog, branches, stages};
pub use definition::{Branch, PipelineDefinition, PipelineError, PipelineNode, PipelineResult};
