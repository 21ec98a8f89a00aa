//! # Pipeline Executor
//!
//! Walks a pipeline definition for one run, submitting stages through the
//! work queue in dependency order. The walk enforces the orchestration
//! guarantees:
//!
//! - sequence stages gate on the previous stage's success, with no
//!   speculative submission past a failure
//! - group branches are submitted concurrently and a failing branch never
//!   cancels its siblings; the join barrier is checked against the result
//!   store before the walk continues
//! - the finalize stage runs exactly once, after every pre-finalize node
//!   completed, and its outcome decides the run's terminal status
//! - terminal runs are never re-entered; driving one again reports the
//!   recorded status
//!
//! Because every stage submission goes through the queue's (run, stage)
//! dedup and the store's first-writer-wins recording, driving the same run
//! concurrently or re-driving it after a crash converges on one result.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::DentalflowConfig;
use crate::error::{DentalflowError, Result};
use crate::events::{EventPublisher, WorkflowEvent};
use crate::logging::log_run_operation;
use crate::model::{RunStatus, StageResult, WorkflowRun};
use crate::pipeline::{Branch, PipelineCatalog, PipelineDefinition, PipelineNode};
use crate::queue::{StageMessage, StageMessageMetadata, WorkQueue};
use crate::state_machine::{determine_target_state, RunEvent};
use crate::store::ResultStore;

use super::finalizer::RunFinalizer;

/// Drives workflow runs through their pipeline definitions
#[derive(Clone)]
pub struct PipelineExecutor {
    catalog: Arc<PipelineCatalog>,
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn ResultStore>,
    event_publisher: EventPublisher,
    finalizer: RunFinalizer,
    config: Arc<DentalflowConfig>,
}

impl PipelineExecutor {
    pub fn new(
        catalog: Arc<PipelineCatalog>,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ResultStore>,
        event_publisher: EventPublisher,
        config: Arc<DentalflowConfig>,
    ) -> Self {
        let finalizer = RunFinalizer::new(store.clone(), event_publisher.clone());
        Self {
            catalog,
            queue,
            store,
            event_publisher,
            finalizer,
            config,
        }
    }

    /// Drive one run to a terminal status.
    ///
    /// Safe to call again for the same run: already-terminal stages are
    /// read back instead of re-invoked, and a terminal run is returned
    /// unchanged.
    #[instrument(skip(self, run), fields(run_id = %run.run_id, pipeline = %run.pipeline))]
    pub async fn execute_run(&self, run: &WorkflowRun) -> Result<RunStatus> {
        let current = self
            .store
            .get_run(run.run_id)
            .await?
            .ok_or_else(|| DentalflowError::run_not_found(run.run_id))?;

        if current.status.is_terminal() {
            debug!(run_id = %run.run_id, status = %current.status, "Run already terminal, nothing to drive");
            return Ok(current.status);
        }

        let definition = self
            .catalog
            .definition(run.pipeline)
            .ok_or_else(|| DentalflowError::unknown_pipeline(run.pipeline.to_string()))?;

        self.mark_running(&current).await?;

        for node in definition.nodes() {
            match node {
                PipelineNode::Stage(stage) => {
                    let result = self.run_stage(run, stage).await?;
                    if !result.is_success() {
                        // The chain is broken: nothing downstream, finalize
                        // included, may be submitted
                        let reason = match &result.error {
                            Some(error) => format!("stage '{stage}' failed: {}", error.message),
                            None => format!("stage '{stage}' failed"),
                        };
                        warn!(run_id = %run.run_id, stage = %stage, "Pipeline halted before finalize");
                        return self.finalizer.fail_run(run.run_id, reason).await;
                    }
                }
                PipelineNode::Group(branches) => {
                    self.run_group(run, &definition, branches).await?;
                }
            }
        }

        self.run_stage(run, definition.finalize_stage()).await?;
        self.finalizer
            .finalize_run(run.run_id, definition.finalize_stage())
            .await
    }

    /// Transition `Pending → Running` ahead of the first submission
    async fn mark_running(&self, run: &WorkflowRun) -> Result<()> {
        if run.status != RunStatus::Pending {
            return Ok(());
        }

        let target = determine_target_state(run.status, &RunEvent::Start)?;
        self.store.update_run_status(run.run_id, target).await?;

        log_run_operation(
            "start",
            Some(&run.run_id.to_string()),
            Some(&run.study.study_id),
            &target.to_string(),
            None,
        );
        let _ = self
            .event_publisher
            .publish(WorkflowEvent::RunStarted {
                run_id: run.run_id,
                study_id: run.study.study_id.clone(),
                pipeline: run.pipeline,
            })
            .await;

        Ok(())
    }

    /// Submit one stage and await its terminal result
    async fn run_stage(&self, run: &WorkflowRun, stage: &str) -> Result<StageResult> {
        let metadata =
            StageMessageMetadata::from_config(&self.config.execution, &self.config.backoff);
        let message =
            StageMessage::with_metadata(run.run_id, stage, run.pipeline, run.study.clone(), metadata);

        let handle = self.queue.submit(message).await?;
        Ok(handle.wait().await?)
    }

    /// Run all branches of a group concurrently and wait at the join
    /// barrier until every branch is complete in the store
    async fn run_group(
        &self,
        run: &WorkflowRun,
        definition: &PipelineDefinition,
        branches: &[Branch],
    ) -> Result<()> {
        debug!(
            run_id = %run.run_id,
            branches = branches.len(),
            "Submitting group branches"
        );

        // join_all rather than try_join_all: an infrastructure error in one
        // branch must not cancel siblings mid-invocation
        let outcomes =
            futures::future::join_all(branches.iter().map(|branch| self.run_branch(run, branch)))
                .await;
        for outcome in outcomes {
            outcome?;
        }

        let mut complete = Vec::with_capacity(branches.len());
        for branch in branches {
            if !self.store.is_branch_complete(run.run_id, branch).await? {
                return Err(DentalflowError::internal(format!(
                    "join barrier not satisfied for branch '{}' of run {}",
                    branch.name, run.run_id
                )));
            }
            complete.push(branch.name.clone());
        }

        info!(
            run_id = %run.run_id,
            pipeline = definition.name(),
            branches = ?complete,
            "Join barrier satisfied"
        );
        let _ = self
            .event_publisher
            .publish(WorkflowEvent::JoinSatisfied {
                run_id: run.run_id,
                branches: complete,
            })
            .await;

        Ok(())
    }

    /// Run a branch's stages strictly in order, stopping at the first
    /// non-success. The failure stays contained to the branch.
    async fn run_branch(&self, run: &WorkflowRun, branch: &Branch) -> Result<()> {
        for stage in &branch.stages {
            let result = self.run_stage(run, stage).await?;
            if !result.is_success() {
                warn!(
                    run_id = %run.run_id,
                    branch = %branch.name,
                    stage = %stage,
                    "Branch short-circuited, siblings unaffected"
                );
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use crate::model::{StageError, StudyKind, StudyRef};
    use crate::queue::InProcessQueue;
    use crate::stage::{StageContext, StageHandler, StageRegistry};
    use crate::store::InMemoryResultStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Handler that records invocation order and fails where scripted
    struct ScriptedStages {
        invocations: Arc<Mutex<Vec<String>>>,
        failures: HashMap<String, StageError>,
    }

    struct ScriptedStageHandler {
        stage: String,
        shared: Arc<ScriptedStages>,
    }

    #[async_trait]
    impl StageHandler for ScriptedStageHandler {
        async fn process(
            &self,
            context: &StageContext,
        ) -> std::result::Result<serde_json::Value, StageError> {
            self.shared.invocations.lock().push(context.stage.clone());
            if let Some(error) = self.shared.failures.get(&self.stage) {
                return Err(error.clone());
            }
            Ok(serde_json::json!({ "stage": self.stage }))
        }
    }

    struct Harness {
        executor: PipelineExecutor,
        store: Arc<InMemoryResultStore>,
        publisher: EventPublisher,
        invocations: Arc<Mutex<Vec<String>>>,
    }

    fn harness(failures: HashMap<String, StageError>) -> Harness {
        let catalog = Arc::new(PipelineCatalog::builtin().unwrap());
        let store: Arc<InMemoryResultStore> = Arc::new(InMemoryResultStore::new());
        let publisher = EventPublisher::new(256);
        let config = Arc::new(DentalflowConfig::for_testing());

        let shared = Arc::new(ScriptedStages {
            invocations: Arc::new(Mutex::new(Vec::new())),
            failures,
        });
        let registry = Arc::new(StageRegistry::new());
        for kind in catalog.kinds() {
            let definition = catalog.definition(kind).unwrap();
            for stage in definition
                .stage_names()
                .into_iter()
                .chain([definition.finalize_stage()])
            {
                registry.register(
                    stage,
                    Arc::new(ScriptedStageHandler {
                        stage: stage.to_string(),
                        shared: shared.clone(),
                    }),
                );
            }
        }

        let queue = Arc::new(InProcessQueue::new(
            registry,
            store.clone(),
            publisher.clone(),
            &config,
        ));
        let executor = PipelineExecutor::new(
            catalog,
            queue,
            store.clone(),
            publisher.clone(),
            config,
        );

        Harness {
            executor,
            store,
            publisher,
            invocations: shared.invocations.clone(),
        }
    }

    fn study() -> StudyRef {
        StudyRef {
            study_id: "study-1".to_string(),
            clinic_id: "clinic".to_string(),
            patient_id: "patient".to_string(),
            staged_path: "/tmp/scan.nii.gz".into(),
            original_filename: "scan.nii.gz".to_string(),
            size_bytes: 4096,
        }
    }

    async fn new_run(h: &Harness, kind: StudyKind) -> WorkflowRun {
        let run = WorkflowRun::new(study(), kind);
        h.store.create_run(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn test_linear_pipeline_succeeds_in_order() {
        let h = harness(HashMap::new());
        let run = new_run(&h, StudyKind::Pano).await;

        let status = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(status, RunStatus::Succeeded);
        assert_eq!(
            *h.invocations.lock(),
            vec!["validate", "upload_study", "analyze", "aggregate"]
        );
    }

    #[tokio::test]
    async fn test_sequence_failure_skips_downstream_and_finalize() {
        let failures = HashMap::from([(
            "validate".to_string(),
            StageError::permanent("unsupported extension"),
        )]);
        let h = harness(failures);
        let run = new_run(&h, StudyKind::Pano).await;

        let status = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(*h.invocations.lock(), vec!["validate"]);

        let stored = h.store.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_branch_failure_is_contained_and_finalize_runs() {
        let failures = HashMap::from([(
            "analyze".to_string(),
            StageError::permanent("corrupt volume"),
        )]);
        let h = harness(failures);
        let run = new_run(&h, StudyKind::Cbct).await;

        let status = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(status, RunStatus::PartiallyFailed);

        let invocations = h.invocations.lock().clone();
        // Downstream of the failed branch stage never runs
        assert!(!invocations.contains(&"format_report".to_string()));
        assert!(!invocations.contains(&"upload_report".to_string()));
        // The sibling branch and the finalize stage still run
        assert!(invocations.contains(&"upload_slices".to_string()));
        assert_eq!(invocations.last().map(String::as_str), Some("aggregate"));
    }

    #[tokio::test]
    async fn test_join_satisfied_event_lists_branches() {
        let h = harness(HashMap::new());
        let mut events = h.publisher.subscribe();
        let run = new_run(&h, StudyKind::Cbct).await;

        let status = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(status, RunStatus::Succeeded);

        let mut join_branches = None;
        while let Ok(published) = events.try_recv() {
            if let WorkflowEvent::JoinSatisfied { branches, .. } = published.event {
                join_branches = Some(branches);
            }
        }
        assert_eq!(
            join_branches,
            Some(vec!["report".to_string(), "slices".to_string()])
        );
    }

    #[tokio::test]
    async fn test_finalize_failure_fails_the_run() {
        let failures = HashMap::from([(
            "aggregate".to_string(),
            StageError::aggregation("cannot assemble report"),
        )]);
        let h = harness(failures);
        let run = new_run(&h, StudyKind::Nifti).await;

        let status = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(status, RunStatus::Failed);
        // Aggregation errors are not retried
        assert_eq!(*h.invocations.lock(), vec!["extract_slices", "aggregate"]);
    }

    #[tokio::test]
    async fn test_terminal_run_is_not_re_entered() {
        let h = harness(HashMap::new());
        let run = new_run(&h, StudyKind::Nifti).await;

        let first = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(first, RunStatus::Succeeded);
        let invocations_after_first = h.invocations.lock().len();

        let second = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(second, RunStatus::Succeeded);
        assert_eq!(h.invocations.lock().len(), invocations_after_first);
    }

    #[tokio::test]
    async fn test_concurrent_drives_converge_on_one_invocation_set() {
        let h = harness(HashMap::new());
        let run = new_run(&h, StudyKind::Pano).await;

        let (a, b) = tokio::join!(h.executor.execute_run(&run), h.executor.execute_run(&run));
        assert_eq!(a.unwrap(), RunStatus::Succeeded);
        assert_eq!(b.unwrap(), RunStatus::Succeeded);

        // Queue dedup plus first-writer-wins keeps every stage at one
        // invocation even when two walks race
        assert_eq!(h.invocations.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_resume_skips_recorded_stages() {
        let h = harness(HashMap::new());
        let run = new_run(&h, StudyKind::Pano).await;

        // Simulate a previous process that finished validate then died
        h.store
            .update_run_status(run.run_id, RunStatus::Running)
            .await
            .unwrap();
        h.store
            .record(&StageResult::success(
                run.run_id,
                "validate",
                serde_json::json!({"ok": true}),
                1,
            ))
            .await
            .unwrap();

        let status = h.executor.execute_run(&run).await.unwrap();
        assert_eq!(status, RunStatus::Succeeded);
        assert_eq!(
            *h.invocations.lock(),
            vec!["upload_study", "analyze", "aggregate"]
        );
    }
}
