//! Archival upload stages. Both lean on the [`ObjectStore`] collaborator
//! and key objects under the run's artifact prefix so repeated attempts of
//! the same invocation overwrite rather than duplicate.

use std::sync::Arc;
use tracing::debug;

use crate::config::DentalflowConfig;
use crate::model::StageError;
use crate::pipeline::stages;
use crate::stage::collaborators::{classify_read_error, ObjectStore};
use crate::stage::handler::{StageContext, StageHandler};

/// MIME type for an upload, derived from the staged file extension
pub(crate) fn content_type_for(extension: &str) -> &'static str {
    match extension {
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".tif" | ".tiff" => "image/tiff",
        ".bmp" => "image/bmp",
        ".json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Copies the original staged upload into the image bucket
pub struct UploadStudyHandler {
    config: Arc<DentalflowConfig>,
    object_store: Arc<dyn ObjectStore>,
}

impl UploadStudyHandler {
    pub fn new(config: Arc<DentalflowConfig>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            object_store,
        }
    }
}

#[async_trait::async_trait]
impl StageHandler for UploadStudyHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        let study = &context.study;
        let bytes = tokio::fs::read(&study.staged_path)
            .await
            .map_err(|e| classify_read_error(&e, &study.staged_path))?;

        let extension = study.extension().unwrap_or_default();
        let key = format!("{}/original{}", context.artifact_prefix(), extension);
        let stored = self
            .object_store
            .put(
                &self.config.storage.image_bucket,
                &key,
                bytes,
                content_type_for(&extension),
                true,
            )
            .await?;

        debug!(
            study_id = %study.study_id,
            bucket = %stored.bucket,
            key = %stored.key,
            "Original study archived"
        );

        serde_json::to_value(&stored)
            .map_err(|e| StageError::permanent(format!("failed to encode upload result: {e}")))
    }
}

/// Serializes the formatted report and stores it as
/// `{clinic}/{patient}/{kind}/{run}/report.json`
pub struct UploadReportHandler {
    config: Arc<DentalflowConfig>,
    object_store: Arc<dyn ObjectStore>,
}

impl UploadReportHandler {
    pub fn new(config: Arc<DentalflowConfig>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            object_store,
        }
    }
}

#[async_trait::async_trait]
impl StageHandler for UploadReportHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        let report = context
            .upstream_payload(stages::FORMAT_REPORT)
            .ok_or_else(|| StageError::permanent("formatted report unavailable for upload"))?;

        let bytes = serde_json::to_vec(report)
            .map_err(|e| StageError::permanent(format!("failed to encode report: {e}")))?;

        let key = format!("{}/report.json", context.artifact_prefix());
        let stored = self
            .object_store
            .put(
                &self.config.storage.report_bucket,
                &key,
                bytes,
                "application/json",
                true,
            )
            .await?;

        debug!(
            run_id = %context.run_id,
            bucket = %stored.bucket,
            key = %stored.key,
            size_bytes = stored.size_bytes,
            "Report persisted"
        );

        serde_json::to_value(&stored)
            .map_err(|e| StageError::permanent(format!("failed to encode upload result: {e}")))
    }
}
