//! Slice export stage. Drives the [`SliceExporter`] collaborator for both
//! the CBCT slice branch and the standalone NIfTI pipeline.

use std::sync::Arc;
use tracing::debug;

use crate::config::DentalflowConfig;
use crate::model::StageError;
use crate::stage::collaborators::SliceExporter;
use crate::stage::handler::{StageContext, StageHandler};

pub struct SliceExportHandler {
    config: Arc<DentalflowConfig>,
    exporter: Arc<dyn SliceExporter>,
}

impl SliceExportHandler {
    pub fn new(config: Arc<DentalflowConfig>, exporter: Arc<dyn SliceExporter>) -> Self {
        Self { config, exporter }
    }
}

#[async_trait::async_trait]
impl StageHandler for SliceExportHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        let bucket = &self.config.storage.slice_bucket;
        let prefix = context.artifact_prefix();

        let summary = self
            .exporter
            .export_slices(&context.study, bucket, &prefix)
            .await?;

        debug!(
            study_id = %context.study.study_id,
            total_slices = summary.total_slices,
            bucket = %bucket,
            "Slice export finished"
        );

        let summary = serde_json::to_value(&summary)
            .map_err(|e| StageError::permanent(format!("failed to encode slice summary: {e}")))?;

        Ok(serde_json::json!({
            "destination": { "bucket": bucket, "prefix": prefix },
            "summary": summary,
        }))
    }
}
