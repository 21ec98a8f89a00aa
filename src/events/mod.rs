// Lifecycle event publishing for workflow observers
//
// Events are broadcast best-effort; publishing with zero subscribers is
// not an error and never blocks orchestration progress.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
pub use types::WorkflowEvent;
