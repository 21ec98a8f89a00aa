//! End-to-end runs through the public [`WorkflowSystem`] surface, with the
//! built-in handlers, a local object store and scripted collaborators.

mod common;

use common::fixtures::*;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dentalflow_core::config::DentalflowConfig;
use dentalflow_core::events::WorkflowEvent;
use dentalflow_core::model::{
    RunStatus, StageError, StageErrorKind, StageOutcome, StageResult, StudyKind, WorkflowRun,
};
use dentalflow_core::stage::builtin::{UploadStudyHandler, REPORT_FORMAT_VERSION};
use dentalflow_core::stage::{
    builtin_registry, LocalObjectStore, ObjectStore, StageContext, StageHandler, StageRegistry,
};
use dentalflow_core::store::{InMemoryResultStore, ResultStore, SqliteResultStore};
use dentalflow_core::WorkflowSystem;

struct Scenario {
    system: WorkflowSystem,
    store: Arc<InMemoryResultStore>,
    registry: Arc<StageRegistry>,
    config: Arc<DentalflowConfig>,
    objects: Arc<LocalObjectStore>,
    analyzer: Arc<ScriptedAnalyzer>,
    exporter: Arc<ScriptedExporter>,
    staging: PathBuf,
    artifact_root: PathBuf,
    _dir: tempfile::TempDir,
}

fn scenario(analyzer: ScriptedAnalyzer) -> Scenario {
    let dir = tempfile::tempdir().expect("create scenario directory");
    let staging = dir.path().join("staging");
    let artifact_root = dir.path().join("artifacts");

    let config = Arc::new(DentalflowConfig::for_testing());
    let objects = Arc::new(LocalObjectStore::new(&artifact_root));
    let analyzer = Arc::new(analyzer);
    let exporter = Arc::new(ScriptedExporter::new());

    let registry = Arc::new(builtin_registry(
        config.clone(),
        analyzer.clone(),
        exporter.clone(),
        objects.clone(),
    ));
    let store = Arc::new(InMemoryResultStore::new());
    let system = WorkflowSystem::new(config.clone(), registry.clone(), store.clone())
        .expect("build workflow system");

    Scenario {
        system,
        store,
        registry,
        config,
        objects,
        analyzer,
        exporter,
        staging,
        artifact_root,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_cbct_run_completes_with_both_branches() {
    let findings = serde_json::json!({
        "teeth": {"missing": ["18"], "restored": ["36"]},
        "lesions": [],
    });
    let h = scenario(ScriptedAnalyzer::succeeding(findings.clone()));
    let study = staged_study(&h.staging, "study-301", "volume.nii.gz", &[1u8; 4096]);
    let mut events = h.system.subscribe();

    let run_id = h.system.start_workflow(study, StudyKind::Cbct).await.unwrap();
    let status = h.system.await_completion(run_id).await.unwrap();
    assert_eq!(status, RunStatus::Succeeded);

    let report = h.system.get_status(run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.progress_percent, 100);
    assert_eq!(report.stages.len(), 6);
    assert!(report.stages.iter().all(|s| s.outcome == StageOutcome::Success));
    assert!(report.failed_stages().is_empty());

    // The formatted report landed in the report bucket under the run prefix
    let report_key = format!("clinic-17/patient-4/cbct/{run_id}/report.json");
    let report_path = h.artifact_root.join("reports").join(&report_key);
    let stored: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&report_path).unwrap()).unwrap();
    assert_eq!(stored["report_id"], run_id.to_string());
    assert_eq!(stored["study_id"], "study-301");
    assert_eq!(stored["format_version"], REPORT_FORMAT_VERSION);
    assert_eq!(stored["findings"], findings);

    // The original volume was archived alongside
    let original_key = format!("clinic-17/patient-4/cbct/{run_id}/original.nii.gz");
    assert!(h.objects.exists("images", &original_key).await.unwrap());

    // The slice branch drove the exporter exactly once, into the slice bucket
    assert_eq!(
        h.exporter.exports(),
        vec![(
            "slices".to_string(),
            format!("clinic-17/patient-4/cbct/{run_id}")
        )]
    );
    assert_eq!(h.analyzer.calls(), 1);

    let mut names = Vec::new();
    loop {
        let published = events.recv().await.expect("event stream closed");
        let done = matches!(published.event, WorkflowEvent::RunCompleted { .. });
        names.push(published.event.name());
        if done {
            break;
        }
    }
    assert_eq!(names[0], "run_started");
    assert!(names.contains(&"join_satisfied"));
    assert_eq!(*names.last().unwrap(), "run_completed");
}

#[tokio::test]
async fn test_cbct_analysis_failure_degrades_without_blocking_slices() {
    let h = scenario(ScriptedAnalyzer::failing(StageError::permanent(
        "corrupt volume",
    )));
    let study = staged_study(&h.staging, "study-302", "volume.nii.gz", &[1u8; 4096]);

    let run_id = h.system.start_workflow(study, StudyKind::Cbct).await.unwrap();
    let status = h.system.await_completion(run_id).await.unwrap();
    assert_eq!(status, RunStatus::PartiallyFailed);

    let report = h.system.get_status(run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::PartiallyFailed);
    assert_eq!(report.progress_percent, 66);

    let failed = report.failed_stages();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, "analyze");
    assert_eq!(failed[0].error_kind, Some(StageErrorKind::Permanent));
    assert_eq!(failed[0].error_message.as_deref(), Some("corrupt volume"));
    assert_eq!(failed[0].attempts, 1);

    // Nothing downstream of the failed analysis was submitted
    let stages: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
    assert!(!stages.contains(&"format_report"));
    assert!(!stages.contains(&"upload_report"));

    // The slice branch ran to completion regardless
    let slices = report
        .stages
        .iter()
        .find(|s| s.stage == "upload_slices")
        .unwrap();
    assert_eq!(slices.outcome, StageOutcome::Success);
    assert_eq!(h.exporter.calls(), 1);

    // No report artifact was written
    let report_key = format!("clinic-17/patient-4/cbct/{run_id}/report.json");
    assert!(!h.objects.exists("reports", &report_key).await.unwrap());

    // The closing aggregate names the failed branch
    let aggregate = h
        .store
        .get_stage_result(run_id, "aggregate")
        .await
        .unwrap()
        .unwrap();
    let payload = aggregate.payload.unwrap();
    assert_eq!(payload["complete"], false);
    assert_eq!(payload["failures"][0]["stage"], "analyze");
}

/// Wrapper that overruns its own stage budget on the first two
/// invocations, then delegates to the real upload handler
struct SlowStartUploadHandler {
    inner: UploadStudyHandler,
    invocations: AtomicU32,
}

#[async_trait::async_trait]
impl StageHandler for SlowStartUploadHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if invocation <= 2 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.process(context).await
    }

    fn timeout_override(&self) -> Option<Duration> {
        Some(Duration::from_millis(50))
    }
}

#[tokio::test]
async fn test_pano_upload_timeouts_retry_then_succeed() {
    let h = scenario(ScriptedAnalyzer::succeeding(
        serde_json::json!({"teeth_detected": 28}),
    ));
    let slow = Arc::new(SlowStartUploadHandler {
        inner: UploadStudyHandler::new(h.config.clone(), h.objects.clone()),
        invocations: AtomicU32::new(0),
    });
    h.registry.register("upload_study", slow.clone());

    let study = staged_study(&h.staging, "study-303", "pano.png", &[7u8; 512]);
    let mut events = h.system.subscribe();

    let run_id = h.system.start_workflow(study, StudyKind::Pano).await.unwrap();
    let status = h.system.await_completion(run_id).await.unwrap();
    assert_eq!(status, RunStatus::Succeeded);

    let report = h.system.get_status(run_id).await.unwrap();
    assert_eq!(report.progress_percent, 100);
    let upload = report
        .stages
        .iter()
        .find(|s| s.stage == "upload_study")
        .unwrap();
    assert_eq!(upload.outcome, StageOutcome::Success);
    assert_eq!(upload.attempts, 3);
    assert_eq!(slow.invocations.load(Ordering::SeqCst), 3);

    // Retries stayed within the upload stage; the rest of the chain ran once
    assert_eq!(h.analyzer.calls(), 1);

    // Both timeouts surfaced as retry events with the doubling delay
    let mut retries = Vec::new();
    loop {
        let published = events.recv().await.expect("event stream closed");
        match published.event {
            WorkflowEvent::StageRetrying {
                stage,
                attempt,
                delay_ms,
                reason,
                ..
            } => {
                assert_eq!(stage, "upload_study");
                assert!(reason.contains("timed out"));
                retries.push((attempt, delay_ms));
            }
            WorkflowEvent::RunCompleted { .. } => break,
            _ => {}
        }
    }
    assert_eq!(retries, vec![(1u32, 10u64), (2, 20)]);

    let original_key = format!("clinic-17/patient-4/pano/{run_id}/original.png");
    assert!(h.objects.exists("images", &original_key).await.unwrap());
}

struct BrokenAggregateHandler;

#[async_trait::async_trait]
impl StageHandler for BrokenAggregateHandler {
    async fn process(&self, _context: &StageContext) -> Result<serde_json::Value, StageError> {
        Err(StageError::aggregation("closing summary assembly failed"))
    }
}

#[tokio::test]
async fn test_aggregation_failure_fails_the_run() {
    let h = scenario(ScriptedAnalyzer::succeeding(
        serde_json::json!({"teeth_detected": 28}),
    ));
    h.registry.register("aggregate", Arc::new(BrokenAggregateHandler));

    let study = staged_study(&h.staging, "study-304", "pano.png", &[7u8; 512]);
    let run_id = h.system.start_workflow(study, StudyKind::Pano).await.unwrap();
    assert_eq!(
        h.system.await_completion(run_id).await.unwrap(),
        RunStatus::Failed
    );

    let report = h.system.get_status(run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);

    let aggregate = report
        .stages
        .iter()
        .find(|s| s.stage == "aggregate")
        .unwrap();
    assert_eq!(aggregate.outcome, StageOutcome::Failure);
    assert_eq!(aggregate.error_kind, Some(StageErrorKind::Aggregation));
    // Aggregation errors are not retried
    assert_eq!(aggregate.attempts, 1);

    // Every pre-finalize stage had already succeeded
    for stage in ["validate", "upload_study", "analyze"] {
        let summary = report.stages.iter().find(|s| s.stage == stage).unwrap();
        assert_eq!(summary.outcome, StageOutcome::Success);
    }
}

#[tokio::test]
async fn test_sqlite_store_resumes_interrupted_runs() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let db_url = format!("sqlite://{}", dir.path().join("runs.db").display());

    let study = staged_study(&staging, "study-305", "volume.nii.gz", &[9u8; 2048]);
    let run = WorkflowRun::new(study, StudyKind::Nifti);
    let run_id = run.run_id;

    // First process: accept the run and finish extract_slices, then go
    // down before the finalize stage
    let exported = serde_json::json!({
        "destination": {
            "bucket": "slices",
            "prefix": format!("clinic-17/patient-4/nifti/{run_id}"),
        },
        "summary": {"total_slices": 96},
    });
    {
        let store = SqliteResultStore::connect(&db_url).await.unwrap();
        store.create_run(&run).await.unwrap();
        store
            .update_run_status(run_id, RunStatus::Running)
            .await
            .unwrap();
        store
            .record(&StageResult::success(run_id, "extract_slices", exported, 1))
            .await
            .unwrap();
        store.close().await;
    }

    // Second process: reconnect and resume
    let store = Arc::new(SqliteResultStore::connect(&db_url).await.unwrap());
    let config = Arc::new(DentalflowConfig::for_testing());
    let objects = Arc::new(LocalObjectStore::new(dir.path().join("artifacts")));
    let analyzer = Arc::new(ScriptedAnalyzer::succeeding(serde_json::json!({})));
    let exporter = Arc::new(ScriptedExporter::new());
    let registry = Arc::new(builtin_registry(
        config.clone(),
        analyzer,
        exporter.clone(),
        objects,
    ));
    let system = WorkflowSystem::new(config, registry, store.clone()).unwrap();

    let resumed = system.resume_active_runs().await.unwrap();
    assert_eq!(resumed, vec![run_id]);
    assert_eq!(
        system.await_completion(run_id).await.unwrap(),
        RunStatus::Succeeded
    );

    // The recorded extract_slices result was honored, not re-executed
    assert_eq!(exporter.calls(), 0);

    let report = system.get_status(run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.progress_percent, 100);
    assert_eq!(report.stages.len(), 2);

    let aggregate = store
        .get_stage_result(run_id, "aggregate")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.payload.unwrap()["complete"], true);

    let stored_run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored_run.status, RunStatus::Succeeded);
    assert!(stored_run.completed_at.is_some());
}
