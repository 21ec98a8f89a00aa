//! # Workflow System
//!
//! Front door of the orchestration core. Accepts studies for processing,
//! drives each accepted run on a background task, reports per-stage status,
//! and resumes in-flight runs out of a durable store after a restart.
//!
//! Submission is guarded twice before a run is created: a configurable
//! duplicate policy for studies that already have an active run, and a
//! capacity check that refuses new work once the active-run limit is
//! reached. Both refusals happen before any state is written.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{DentalflowConfig, DuplicatePolicy};
use crate::error::{DentalflowError, Result};
use crate::events::{EventPublisher, PublishedEvent};
use crate::logging::{init_structured_logging, log_run_operation};
use crate::model::{RunStatus, StageErrorKind, StageOutcome, StudyKind, StudyRef, WorkflowRun};
use crate::pipeline::PipelineCatalog;
use crate::queue::InProcessQueue;
use crate::stage::StageRegistry;
use crate::store::ResultStore;

use super::executor::PipelineExecutor;

/// One recorded stage of a run, as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub outcome: StageOutcome,
    pub error_kind: Option<StageErrorKind>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// Caller-facing view of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: Uuid,
    pub study_id: String,
    pub pipeline: StudyKind,
    pub status: RunStatus,
    /// Terminal stages over total pipeline stages, 0 to 100
    pub progress_percent: u8,
    /// Every recorded stage in result order, retrying markers included
    pub stages: Vec<StageSummary>,
}

impl RunStatusReport {
    /// Stages that ended in failure, for degraded-run diagnostics
    pub fn failed_stages(&self) -> Vec<&StageSummary> {
        self.stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Failure)
            .collect()
    }
}

/// Facade over catalog, registry, queue, executor and store
pub struct WorkflowSystem {
    catalog: Arc<PipelineCatalog>,
    store: Arc<dyn ResultStore>,
    executor: PipelineExecutor,
    event_publisher: EventPublisher,
    config: Arc<DentalflowConfig>,
    /// Driver task per run accepted or resumed by this process
    drivers: DashMap<Uuid, JoinHandle<()>>,
}

impl WorkflowSystem {
    /// Wire the orchestration core around the given handler registry and
    /// result store
    pub fn new(
        config: Arc<DentalflowConfig>,
        registry: Arc<StageRegistry>,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        init_structured_logging();

        let catalog = Arc::new(PipelineCatalog::builtin()?);
        let event_publisher = EventPublisher::new(config.execution.event_channel_capacity);
        let queue = Arc::new(InProcessQueue::new(
            registry,
            store.clone(),
            event_publisher.clone(),
            &config,
        ));
        let executor = PipelineExecutor::new(
            catalog.clone(),
            queue,
            store.clone(),
            event_publisher.clone(),
            config.clone(),
        );

        info!(
            pipelines = catalog.len(),
            max_active_runs = config.execution.max_active_runs,
            duplicate_policy = %config.dispatch.duplicate_policy,
            "🚀 Workflow system ready"
        );

        Ok(Self {
            catalog,
            store,
            executor,
            event_publisher,
            config,
            drivers: DashMap::new(),
        })
    }

    /// Accept a staged study for processing and return its run identifier.
    ///
    /// A study with an active run is handled per the configured duplicate
    /// policy, and submissions are refused with a backpressure error once
    /// `max_active_runs` is reached. The returned identifier refers to a
    /// run already being driven in the background.
    #[instrument(skip(self, study), fields(study_id = %study.study_id, pipeline = %kind))]
    pub async fn start_workflow(&self, study: StudyRef, kind: StudyKind) -> Result<Uuid> {
        if let Some(existing) = self.store.find_active_run_for_study(&study.study_id).await? {
            return match self.config.dispatch.duplicate_policy {
                DuplicatePolicy::ReturnExisting => {
                    info!(
                        run_id = %existing.run_id,
                        "Study already in flight, returning existing run"
                    );
                    Ok(existing.run_id)
                }
                DuplicatePolicy::Reject => {
                    warn!(
                        run_id = %existing.run_id,
                        "Study already in flight, rejecting submission"
                    );
                    Err(DentalflowError::duplicate_run(
                        study.study_id,
                        existing.run_id,
                    ))
                }
            };
        }

        let active = self.store.count_active_runs().await?;
        let capacity = self.config.execution.max_active_runs;
        if active >= capacity {
            warn!(active, capacity, "Refusing submission, run capacity reached");
            return Err(DentalflowError::queue_full(active, capacity));
        }

        let run = WorkflowRun::new(study, kind);
        self.store.create_run(&run).await?;

        log_run_operation(
            "accept",
            Some(&run.run_id.to_string()),
            Some(&run.study.study_id),
            &run.status.to_string(),
            Some(&format!("pipeline {kind}")),
        );

        self.spawn_run(&run);
        Ok(run.run_id)
    }

    /// Wait for a run driven by this process to settle, then report its
    /// stored status. A run driven elsewhere is reported as currently
    /// stored without waiting.
    pub async fn await_completion(&self, run_id: Uuid) -> Result<RunStatus> {
        if let Some((_, driver)) = self.drivers.remove(&run_id) {
            driver
                .await
                .map_err(|e| DentalflowError::internal(format!("run driver panicked: {e}")))?;
        }

        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| DentalflowError::run_not_found(run_id))?;
        Ok(run.status)
    }

    /// Status report for one run, with enough per-stage detail to tell a
    /// failed analysis from a failed upload from a failed aggregation
    pub async fn get_status(&self, run_id: Uuid) -> Result<RunStatusReport> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| DentalflowError::run_not_found(run_id))?;
        let definition = self
            .catalog
            .definition(run.pipeline)
            .ok_or_else(|| DentalflowError::unknown_pipeline(run.pipeline.to_string()))?;

        let results = self.store.read_all(run_id).await?;
        let terminal = results.iter().filter(|r| r.is_terminal()).count();
        let total = definition.total_stages().max(1);
        let progress_percent = ((terminal * 100) / total).min(100) as u8;

        let stages = results
            .into_iter()
            .map(|result| {
                let error_kind = result.error_kind();
                StageSummary {
                    stage: result.stage,
                    outcome: result.outcome,
                    error_kind,
                    error_message: result.error.map(|e| e.message),
                    attempts: result.attempt,
                    completed_at: result.completed_at,
                }
            })
            .collect();

        Ok(RunStatusReport {
            run_id,
            study_id: run.study.study_id,
            pipeline: run.pipeline,
            status: run.status,
            progress_percent,
            stages,
        })
    }

    /// Re-drive every non-terminal run found in the store. Called once at
    /// process start when a durable store is configured, so runs interrupted
    /// by a crash pick up at their first unrecorded stage.
    #[instrument(skip(self))]
    pub async fn resume_active_runs(&self) -> Result<Vec<Uuid>> {
        let active = self.store.list_active_runs().await?;
        let mut resumed = Vec::with_capacity(active.len());

        for run in &active {
            log_run_operation(
                "resume",
                Some(&run.run_id.to_string()),
                Some(&run.study.study_id),
                &run.status.to_string(),
                None,
            );
            self.spawn_run(run);
            resumed.push(run.run_id);
        }

        if !resumed.is_empty() {
            info!(count = resumed.len(), "Resumed in-flight runs from the result store");
        }
        Ok(resumed)
    }

    /// Subscribe to workflow lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.event_publisher.subscribe()
    }

    /// Drop terminal runs older than the configured retention window
    pub async fn prune_expired(&self) -> Result<u64> {
        let retention = Duration::from_secs(self.config.storage.result_retention_seconds);
        let removed = self.store.prune_expired(retention).await?;
        if removed > 0 {
            info!(removed, "Pruned expired terminal runs");
        }
        Ok(removed)
    }

    pub fn config(&self) -> &DentalflowConfig {
        &self.config
    }

    fn spawn_run(&self, run: &WorkflowRun) {
        // Drop handles of drivers that already settled; the map stays
        // bounded by the number of active runs
        self.drivers.retain(|_, driver| !driver.is_finished());

        let executor = self.executor.clone();
        let driven = run.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = executor.execute_run(&driven).await {
                error!(run_id = %driven.run_id, error = %err, "Run driver failed");
            }
        });
        self.drivers.insert(run.run_id, handle);
    }
}
