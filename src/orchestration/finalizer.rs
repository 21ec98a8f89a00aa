//! # Run Finalizer
//!
//! Maps the full set of stage results for a run onto its terminal status
//! and applies the transition through the state machine. The mapping is a
//! pure function over the result view, so the same store contents always
//! produce the same terminal status, including after a restart.

use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{DentalflowError, Result};
use crate::events::{EventPublisher, WorkflowEvent};
use crate::logging::log_run_operation;
use crate::model::{RunStatus, StageOutcome, StageResult};
use crate::state_machine::{determine_target_state, RunEvent};
use crate::store::ResultStore;

/// Terminal decision derived from a run's result view
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizationDecision {
    /// Event to feed into the run state machine
    pub event: RunEvent,
    /// Stages that ended in failure, in result order
    pub failed_stages: Vec<String>,
}

/// Derive the terminal run event from the recorded results.
///
/// The finalize stage's own outcome dominates: its failure (or absence)
/// fails the run regardless of how the other stages fared.
pub fn decide_run_event(results: &[StageResult], finalize_stage: &str) -> FinalizationDecision {
    let failed_stages: Vec<String> = results
        .iter()
        .filter(|r| r.outcome == StageOutcome::Failure)
        .map(|r| r.stage.clone())
        .collect();

    let finalize_result = results.iter().find(|r| r.stage == finalize_stage);
    let event = match finalize_result {
        Some(result) if result.is_success() => {
            if failed_stages.is_empty() {
                RunEvent::CompleteSuccessfully
            } else {
                RunEvent::CompletePartially
            }
        }
        Some(result) => {
            let message = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "finalize failed".to_string());
            RunEvent::Fail(format!("finalize stage '{finalize_stage}' failed: {message}"))
        }
        None => RunEvent::Fail(format!(
            "finalize stage '{finalize_stage}' produced no result"
        )),
    };

    FinalizationDecision {
        event,
        failed_stages,
    }
}

/// Applies terminal transitions to workflow runs
#[derive(Clone)]
pub struct RunFinalizer {
    store: Arc<dyn ResultStore>,
    event_publisher: EventPublisher,
}

impl RunFinalizer {
    pub fn new(store: Arc<dyn ResultStore>, event_publisher: EventPublisher) -> Self {
        Self {
            store,
            event_publisher,
        }
    }

    /// Settle a run whose finalize stage has completed. Re-entrant: a run
    /// that is already terminal is reported as-is.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn finalize_run(&self, run_id: Uuid, finalize_stage: &str) -> Result<RunStatus> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| DentalflowError::run_not_found(run_id))?;

        if run.status.is_terminal() {
            debug!(run_id = %run_id, status = %run.status, "Run already terminal, finalization is a no-op");
            return Ok(run.status);
        }

        let results = self.store.read_all(run_id).await?;
        let decision = decide_run_event(&results, finalize_stage);
        let detail = if decision.failed_stages.is_empty() {
            None
        } else {
            Some(format!("failed stages: {}", decision.failed_stages.join(", ")))
        };

        self.settle(run_id, run.status, decision.event, detail.as_deref())
            .await
    }

    /// Fail a run whose pipeline walk stopped before the finalize stage
    /// could be submitted
    #[instrument(skip(self, reason), fields(run_id = %run_id))]
    pub async fn fail_run(&self, run_id: Uuid, reason: impl Into<String>) -> Result<RunStatus> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| DentalflowError::run_not_found(run_id))?;

        if run.status.is_terminal() {
            return Ok(run.status);
        }

        let reason = reason.into();
        self.settle(run_id, run.status, RunEvent::Fail(reason.clone()), Some(&reason))
            .await
    }

    async fn settle(
        &self,
        run_id: Uuid,
        current: RunStatus,
        event: RunEvent,
        detail: Option<&str>,
    ) -> Result<RunStatus> {
        let target = determine_target_state(current, &event)?;
        self.store.update_run_status(run_id, target).await?;

        log_run_operation(
            "complete",
            Some(&run_id.to_string()),
            None,
            &target.to_string(),
            detail,
        );
        info!(run_id = %run_id, status = %target, event = event.event_type(), "Run reached terminal status");

        let _ = self
            .event_publisher
            .publish(WorkflowEvent::RunCompleted {
                run_id,
                status: target,
            })
            .await;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageError;

    fn success(run_id: Uuid, stage: &str) -> StageResult {
        StageResult::success(run_id, stage, serde_json::json!({}), 1)
    }

    fn failure(run_id: Uuid, stage: &str, error: StageError) -> StageResult {
        StageResult::failure(run_id, stage, error, 1)
    }

    #[test]
    fn test_all_success_completes_successfully() {
        let run_id = Uuid::new_v4();
        let results = vec![
            success(run_id, "validate"),
            success(run_id, "analyze"),
            success(run_id, "aggregate"),
        ];
        let decision = decide_run_event(&results, "aggregate");
        assert!(matches!(decision.event, RunEvent::CompleteSuccessfully));
        assert!(decision.failed_stages.is_empty());
    }

    #[test]
    fn test_failed_branch_completes_partially() {
        let run_id = Uuid::new_v4();
        let results = vec![
            success(run_id, "validate"),
            failure(run_id, "analyze", StageError::permanent("corrupt volume")),
            success(run_id, "upload_slices"),
            success(run_id, "aggregate"),
        ];
        let decision = decide_run_event(&results, "aggregate");
        assert!(matches!(decision.event, RunEvent::CompletePartially));
        assert_eq!(decision.failed_stages, vec!["analyze"]);
    }

    #[test]
    fn test_failed_finalize_fails_the_run() {
        let run_id = Uuid::new_v4();
        let results = vec![
            success(run_id, "validate"),
            failure(run_id, "aggregate", StageError::aggregation("cannot write report")),
        ];
        let decision = decide_run_event(&results, "aggregate");
        match decision.event {
            RunEvent::Fail(reason) => {
                assert!(reason.contains("aggregate"));
                assert!(reason.contains("cannot write report"));
            }
            other => panic!("expected Fail, got {}", other.event_type()),
        }
    }

    #[test]
    fn test_missing_finalize_result_fails_the_run() {
        let run_id = Uuid::new_v4();
        let results = vec![success(run_id, "validate")];
        let decision = decide_run_event(&results, "aggregate");
        assert!(matches!(decision.event, RunEvent::Fail(_)));
    }
}
