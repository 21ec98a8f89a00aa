//! AI analysis stage. Thin adapter over the [`StudyAnalyzer`] collaborator
//! so the model backend can be swapped without touching orchestration.

use std::sync::Arc;
use tracing::debug;

use crate::model::StageError;
use crate::stage::collaborators::StudyAnalyzer;
use crate::stage::handler::{StageContext, StageHandler};

pub struct AnalyzeStudyHandler {
    analyzer: Arc<dyn StudyAnalyzer>,
}

impl AnalyzeStudyHandler {
    pub fn new(analyzer: Arc<dyn StudyAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait::async_trait]
impl StageHandler for AnalyzeStudyHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        let findings = self
            .analyzer
            .analyze(&context.study, context.pipeline)
            .await?;

        debug!(
            study_id = %context.study.study_id,
            pipeline = %context.pipeline,
            attempt = context.attempt,
            "Analysis produced findings"
        );

        Ok(findings)
    }
}
