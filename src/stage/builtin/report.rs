//! Report formatting stage. Wraps raw analysis findings in the clinical
//! report envelope consumed by downstream viewers.

use chrono::Utc;

use crate::model::StageError;
use crate::pipeline::stages;
use crate::stage::handler::{StageContext, StageHandler};

/// Schema version stamped into every formatted report
pub const REPORT_FORMAT_VERSION: &str = "2.0";

pub struct FormatReportHandler;

impl FormatReportHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FormatReportHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StageHandler for FormatReportHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        // Formatting only makes sense over a successful analysis
        let findings = context.upstream_payload(stages::ANALYZE).ok_or_else(|| {
            StageError::permanent("analysis results unavailable for report formatting")
        })?;

        Ok(serde_json::json!({
            "report_id": context.run_id,
            "study_id": context.study.study_id,
            "clinic_id": context.study.clinic_id,
            "patient_id": context.study.patient_id,
            "report_type": context.pipeline,
            "format_version": REPORT_FORMAT_VERSION,
            "generated_at": Utc::now(),
            "generated_by": "dentalflow-core",
            "findings": findings,
        }))
    }
}
