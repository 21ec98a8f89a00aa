//! # In-Process Work Queue
//!
//! Executes stage invocations on the tokio runtime with bounded
//! concurrency. The queue owns the full invocation lifecycle for one
//! (run, stage) pair: at-most-one concurrent invocation, per-attempt
//! timeouts, retry with exponential backoff for transient failures, and
//! recording the terminal result in the store.
//!
//! A duplicate submit while an invocation is in flight joins the existing
//! one instead of starting a second; a submit after the stage is terminal
//! returns the recorded result without invoking the handler at all.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::config::DentalflowConfig;
use crate::events::{EventPublisher, WorkflowEvent};
use crate::logging::log_stage_operation;
use crate::model::{StageError, StageResult};
use crate::stage::{StageContext, StageHandler, StageRegistry};
use crate::store::{RecordOutcome, ResultStore};

use super::backoff::BackoffPolicy;
use super::errors::{QueueError, QueueResult};
use super::message::StageMessage;

type InvocationKey = (Uuid, String);

/// Submission boundary between the executor and stage execution
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Submit a stage invocation and obtain a handle to await its terminal
    /// result
    async fn submit(&self, message: StageMessage) -> QueueResult<StageHandle>;
}

/// Awaitable handle for one submitted stage invocation
#[derive(Debug)]
pub struct StageHandle {
    run_id: Uuid,
    stage: String,
    inner: HandleInner,
}

#[derive(Debug)]
enum HandleInner {
    /// The stage was already terminal at submit time
    Ready(Box<StageResult>),
    /// An invocation is in flight; the result arrives on the channel
    Pending(broadcast::Receiver<StageResult>),
}

impl StageHandle {
    fn ready(result: StageResult) -> Self {
        Self {
            run_id: result.run_id,
            stage: result.stage.clone(),
            inner: HandleInner::Ready(Box::new(result)),
        }
    }

    fn pending(run_id: Uuid, stage: String, receiver: broadcast::Receiver<StageResult>) -> Self {
        Self {
            run_id,
            stage,
            inner: HandleInner::Pending(receiver),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Wait for the terminal result of the invocation
    pub async fn wait(self) -> QueueResult<StageResult> {
        match self.inner {
            HandleInner::Ready(result) => Ok(*result),
            HandleInner::Pending(mut receiver) => receiver
                .recv()
                .await
                .map_err(|_| QueueError::channel_closed(self.run_id, self.stage)),
        }
    }
}

/// Work queue running stage handlers as tokio tasks
#[derive(Clone)]
pub struct InProcessQueue {
    registry: Arc<StageRegistry>,
    store: Arc<dyn ResultStore>,
    event_publisher: EventPublisher,
    backoff: BackoffPolicy,
    /// Semaphore to control concurrent handler execution
    invocation_semaphore: Arc<Semaphore>,
    /// One entry per invocation currently in flight
    in_flight: Arc<DashMap<InvocationKey, broadcast::Sender<StageResult>>>,
}

impl InProcessQueue {
    pub fn new(
        registry: Arc<StageRegistry>,
        store: Arc<dyn ResultStore>,
        event_publisher: EventPublisher,
        config: &DentalflowConfig,
    ) -> Self {
        Self {
            registry,
            store,
            event_publisher,
            backoff: BackoffPolicy::from_config(&config.backoff),
            invocation_semaphore: Arc::new(Semaphore::new(config.execution.max_concurrent_stages)),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Number of invocations currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Run the full attempt loop for one invocation. Never returns an
    /// error: every failure mode folds into a terminal `StageResult`.
    #[instrument(skip(self, handler, message), fields(run_id = %message.run_id, stage = %message.stage))]
    async fn run_invocation(
        &self,
        handler: Arc<dyn StageHandler>,
        message: StageMessage,
    ) -> StageResult {
        let run_id = message.run_id;
        let stage = message.stage.as_str();
        let max_attempts = message.metadata.max_attempts.max(1);
        let budget = handler.timeout_override().unwrap_or_else(|| message.timeout());
        let mut attempt: u32 = 1;

        loop {
            let _ = self
                .event_publisher
                .publish(WorkflowEvent::StageStarted {
                    run_id,
                    stage: stage.to_string(),
                    attempt,
                })
                .await;

            let started = Instant::now();
            let outcome = self.invoke_once(&handler, &message, attempt, budget).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(payload) => {
                    log_stage_operation(
                        "invoke",
                        Some(&run_id.to_string()),
                        Some(stage),
                        Some(attempt),
                        "success",
                        Some(&format!("{duration_ms}ms")),
                    );
                    let result = StageResult::success(run_id, stage, payload, attempt);
                    return self.seal(result).await;
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff.delay_after_attempt(attempt);
                    log_stage_operation(
                        "invoke",
                        Some(&run_id.to_string()),
                        Some(stage),
                        Some(attempt),
                        "retrying",
                        Some(&error.message),
                    );

                    let marker = StageResult::retrying(run_id, stage, error.clone(), attempt);
                    match self.store.record(&marker).await {
                        Ok(RecordOutcome::Recorded) => {}
                        // Another writer already sealed this stage
                        Ok(RecordOutcome::AlreadyTerminal(existing)) => return *existing,
                        Err(e) => {
                            warn!(run_id = %run_id, stage = %stage, error = %e, "Failed to record retry marker")
                        }
                    }

                    let _ = self
                        .event_publisher
                        .publish(WorkflowEvent::StageRetrying {
                            run_id,
                            stage: stage.to_string(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            reason: error.message.clone(),
                        })
                        .await;

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    log_stage_operation(
                        "invoke",
                        Some(&run_id.to_string()),
                        Some(stage),
                        Some(attempt),
                        "failure",
                        Some(&error.message),
                    );
                    let result = StageResult::failure(run_id, stage, error, attempt);
                    return self.seal(result).await;
                }
            }
        }
    }

    /// One attempt under the concurrency cap and timeout budget
    async fn invoke_once(
        &self,
        handler: &Arc<dyn StageHandler>,
        message: &StageMessage,
        attempt: u32,
        budget: Duration,
    ) -> Result<serde_json::Value, StageError> {
        let _permit = self
            .invocation_semaphore
            .acquire()
            .await
            .map_err(|e| StageError::transient(format!("work queue unavailable: {e}")))?;

        let upstream = self
            .store
            .read_all(message.run_id)
            .await
            .map_err(|e| StageError::transient(format!("failed to load upstream results: {e}")))?
            .into_iter()
            .map(|result| (result.stage.clone(), result))
            .collect();

        let context = StageContext {
            run_id: message.run_id,
            stage: message.stage.clone(),
            study: message.study.clone(),
            pipeline: message.pipeline,
            attempt,
            upstream,
        };

        match timeout(budget, handler.process(&context)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::transient(format!(
                "stage timed out after {}ms",
                budget.as_millis()
            ))),
        }
    }

    /// Persist a terminal result, deferring to an earlier writer if one won
    async fn seal(&self, result: StageResult) -> StageResult {
        match self.store.record(&result).await {
            Ok(RecordOutcome::Recorded) => {
                let _ = self
                    .event_publisher
                    .publish(WorkflowEvent::StageCompleted {
                        run_id: result.run_id,
                        stage: result.stage.clone(),
                        outcome: result.outcome,
                    })
                    .await;
                result
            }
            Ok(RecordOutcome::AlreadyTerminal(existing)) => *existing,
            Err(e) => {
                error!(
                    run_id = %result.run_id,
                    stage = %result.stage,
                    error = %e,
                    "Failed to persist stage result"
                );
                StageResult::failure(
                    result.run_id,
                    &result.stage,
                    StageError::transient(format!("failed to persist stage result: {e}")),
                    result.attempt,
                )
            }
        }
    }
}

#[async_trait]
impl WorkQueue for InProcessQueue {
    async fn submit(&self, message: StageMessage) -> QueueResult<StageHandle> {
        let run_id = message.run_id;
        let stage = message.stage.clone();

        // A terminal result makes re-submission a read, not an invocation
        if let Some(existing) = self.store.get_stage_result(run_id, &stage).await? {
            if existing.is_terminal() {
                debug!(run_id = %run_id, stage = %stage, "Stage already terminal, returning recorded result");
                return Ok(StageHandle::ready(existing));
            }
        }

        let handler = self
            .registry
            .get(&stage)
            .ok_or_else(|| QueueError::handler_not_found(&stage))?;

        let key: InvocationKey = (run_id, stage.clone());
        let receiver = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(run_id = %run_id, stage = %stage, "Joining in-flight invocation");
                entry.get().subscribe()
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = broadcast::channel(1);
                entry.insert(sender.clone());

                let queue = self.clone();
                tokio::spawn(async move {
                    let result = queue.run_invocation(handler, message).await;
                    // Drop the in-flight entry first so late submitters go
                    // through the store instead of a spent channel
                    queue.in_flight.remove(&key);
                    let _ = sender.send(result);
                });
                receiver
            }
        };

        Ok(StageHandle::pending(run_id, stage, receiver))
    }
}
