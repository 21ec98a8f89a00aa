//! # External Collaborator Boundaries
//!
//! The AI inference, slice-export and object-storage collaborators are
//! invoked as the body of exactly one stage kind each; the orchestration
//! core only sees their payload/error contract. A filesystem-backed object
//! store ships with the crate; analyzers and slice exporters are supplied
//! by the embedding service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::model::{StageError, StudyKind, StudyRef};

/// AI inference boundary: produces structured findings for a study
#[async_trait]
pub trait StudyAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        study: &StudyRef,
        kind: StudyKind,
    ) -> Result<serde_json::Value, StageError>;
}

/// Summary of an exported slice set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSummary {
    pub total_slices: u32,
    /// Slice count per view name (axial, coronal, sagittal)
    pub views: HashMap<String, u32>,
    pub voxel_size_mm: [f64; 3],
    pub data_shape: [u32; 3],
}

/// Volume slicing boundary: renders a volumetric study into per-view slice
/// images under the given storage destination
#[async_trait]
pub trait SliceExporter: Send + Sync {
    async fn export_slices(
        &self,
        study: &StudyRef,
        bucket: &str,
        prefix: &str,
    ) -> Result<SliceSummary, StageError>;
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    pub content_type: String,
}

/// Object storage boundary with overwrite-by-key semantics
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object. With `upsert` an existing object is overwritten;
    /// without it an existing key is a permanent error.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<StoredObject, StageError>;

    /// Whether an object exists at the key
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StageError>;
}

/// Filesystem-backed object store rooted at a local directory.
///
/// Objects live at `{root}/{bucket}/{key}`; used for local deployments and
/// tests in place of a hosted storage service.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<StoredObject, StageError> {
        let path = self.object_path(bucket, key);

        if !upsert {
            let occupied = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| StageError::transient(format!("storage probe failed: {e}")))?;
            if occupied {
                return Err(StageError::permanent(format!(
                    "object already exists: {bucket}/{key}"
                )));
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::transient(format!("storage mkdir failed: {e}")))?;
        }

        let size_bytes = bytes.len() as u64;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StageError::transient(format!("storage write failed: {e}")))?;

        debug!(bucket = %bucket, key = %key, size_bytes, "Object stored");
        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes,
            content_type: content_type.to_string(),
        })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StageError> {
        tokio::fs::try_exists(self.object_path(bucket, key))
            .await
            .map_err(|e| StageError::transient(format!("storage probe failed: {e}")))
    }
}

/// Map a staged-file read error to a stage error: a missing file cannot be
/// fixed by retrying, anything else might be
pub(crate) fn classify_read_error(err: &std::io::Error, path: &std::path::Path) -> StageError {
    if err.kind() == ErrorKind::NotFound {
        StageError::permanent(format!("staged file missing: {}", path.display()))
    } else {
        StageError::transient(format!("failed to read {}: {err}", path.display()))
    }
}
