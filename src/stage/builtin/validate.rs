//! Intake validation stage. Runs first in every pipeline so malformed
//! uploads fail fast with a permanent error instead of wasting AI time.

use std::sync::Arc;
use tracing::debug;

use crate::config::DentalflowConfig;
use crate::model::{StageError, StudyKind};
use crate::stage::collaborators::classify_read_error;
use crate::stage::handler::{StageContext, StageHandler};

/// Checks the staged file exists, carries an allowed extension for the
/// pipeline kind and fits the configured size cap
pub struct ValidateStudyHandler {
    config: Arc<DentalflowConfig>,
}

impl ValidateStudyHandler {
    pub fn new(config: Arc<DentalflowConfig>) -> Self {
        Self { config }
    }

    fn allowed_extensions(&self, kind: StudyKind) -> &[String] {
        if kind.is_volumetric() {
            &self.config.storage.volumetric_extensions
        } else {
            &self.config.storage.image_extensions
        }
    }

    fn size_cap(&self, kind: StudyKind) -> u64 {
        if kind.is_volumetric() {
            self.config.storage.max_volume_bytes
        } else {
            self.config.storage.max_image_bytes
        }
    }
}

#[async_trait::async_trait]
impl StageHandler for ValidateStudyHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        let study = &context.study;

        let extension = study.extension().ok_or_else(|| {
            StageError::permanent(format!(
                "file '{}' has no extension",
                study.original_filename
            ))
        })?;

        let allowed = self.allowed_extensions(context.pipeline);
        if !allowed.contains(&extension) {
            return Err(StageError::permanent(format!(
                "unsupported extension '{}' for {} study",
                extension, context.pipeline
            )));
        }

        let metadata = tokio::fs::metadata(&study.staged_path)
            .await
            .map_err(|e| classify_read_error(&e, &study.staged_path))?;

        if !metadata.is_file() {
            return Err(StageError::permanent(format!(
                "staged path is not a file: {}",
                study.staged_path.display()
            )));
        }

        let size_bytes = metadata.len();
        if size_bytes == 0 {
            return Err(StageError::permanent("staged file is empty"));
        }

        let cap = self.size_cap(context.pipeline);
        if size_bytes > cap {
            return Err(StageError::permanent(format!(
                "file size {size_bytes} bytes exceeds limit of {cap} bytes"
            )));
        }

        debug!(
            study_id = %study.study_id,
            size_bytes,
            extension = %extension,
            "Study passed intake validation"
        );

        Ok(serde_json::json!({
            "path": study.staged_path,
            "size_bytes": size_bytes,
            "extension": extension,
        }))
    }
}
