//! Shared fixtures for the integration tests: scripted collaborator
//! implementations and a helper for staging study files on disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use dentalflow_core::model::{StageError, StudyKind, StudyRef};
use dentalflow_core::stage::{SliceExporter, SliceSummary, StudyAnalyzer};

/// Analyzer scripted with a fixed outcome, counting invocations
pub struct ScriptedAnalyzer {
    outcome: Result<serde_json::Value, StageError>,
    calls: AtomicU32,
}

impl ScriptedAnalyzer {
    pub fn succeeding(findings: serde_json::Value) -> Self {
        Self {
            outcome: Ok(findings),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: StageError) -> Self {
        Self {
            outcome: Err(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StudyAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _study: &StudyRef,
        _kind: StudyKind,
    ) -> Result<serde_json::Value, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Exporter recording every (bucket, prefix) destination it was driven to
pub struct ScriptedExporter {
    exports: Mutex<Vec<(String, String)>>,
}

impl ScriptedExporter {
    pub fn new() -> Self {
        Self {
            exports: Mutex::new(Vec::new()),
        }
    }

    pub fn exports(&self) -> Vec<(String, String)> {
        self.exports.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.exports.lock().len()
    }
}

impl Default for ScriptedExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SliceExporter for ScriptedExporter {
    async fn export_slices(
        &self,
        _study: &StudyRef,
        bucket: &str,
        prefix: &str,
    ) -> Result<SliceSummary, StageError> {
        self.exports
            .lock()
            .push((bucket.to_string(), prefix.to_string()));
        Ok(sample_slice_summary())
    }
}

/// A plausible slice summary for a small CBCT volume
pub fn sample_slice_summary() -> SliceSummary {
    SliceSummary {
        total_slices: 96,
        views: HashMap::from([
            ("axial".to_string(), 32),
            ("coronal".to_string(), 32),
            ("sagittal".to_string(), 32),
        ]),
        voxel_size_mm: [0.3, 0.3, 0.3],
        data_shape: [256, 256, 192],
    }
}

/// Write study bytes under the staging directory and return the reference
/// the intake service would hand over
pub fn staged_study(staging: &Path, study_id: &str, filename: &str, bytes: &[u8]) -> StudyRef {
    std::fs::create_dir_all(staging).expect("create staging directory");
    let path = staging.join(filename);
    std::fs::write(&path, bytes).expect("write staged study");
    StudyRef {
        study_id: study_id.to_string(),
        clinic_id: "clinic-17".to_string(),
        patient_id: "patient-4".to_string(),
        staged_path: path,
        original_filename: filename.to_string(),
        size_bytes: bytes.len() as u64,
    }
}
