//! # Work Queue Binding
//!
//! Submission and retry semantics for stage invocations. The executor
//! talks to a [`WorkQueue`] and awaits [`StageHandle`]s; the shipped
//! [`InProcessQueue`] runs handlers on the tokio runtime with bounded
//! concurrency, per-attempt timeouts and exponential backoff between
//! retries of transient failures.

pub mod backoff;
pub mod errors;
pub mod in_process;
pub mod message;

pub use backoff::BackoffPolicy;
pub use errors::{QueueError, QueueResult};
pub use in_process::{InProcessQueue, StageHandle, WorkQueue};
pub use message::{StageMessage, StageMessageMetadata};
