//! Built-in stage handlers covering every stage name the shipped pipeline
//! catalog references.

pub mod aggregate;
pub mod analyze;
pub mod report;
pub mod slices;
pub mod upload;
pub mod validate;

pub use aggregate::AggregateHandler;
pub use analyze::AnalyzeStudyHandler;
pub use report::{FormatReportHandler, REPORT_FORMAT_VERSION};
pub use slices::SliceExportHandler;
pub use upload::{UploadReportHandler, UploadStudyHandler};
pub use validate::ValidateStudyHandler;

use std::sync::Arc;

use crate::config::DentalflowConfig;
use crate::pipeline::stages;
use crate::stage::collaborators::{ObjectStore, SliceExporter, StudyAnalyzer};
use crate::stage::registry::StageRegistry;

/// Build a registry with every built-in handler registered under its
/// catalog stage name. The slice exporter serves both the CBCT slice
/// branch and the NIfTI extraction stage.
pub fn builtin_registry(
    config: Arc<DentalflowConfig>,
    analyzer: Arc<dyn StudyAnalyzer>,
    exporter: Arc<dyn SliceExporter>,
    object_store: Arc<dyn ObjectStore>,
) -> StageRegistry {
    let registry = StageRegistry::new();

    registry.register(
        stages::VALIDATE,
        Arc::new(ValidateStudyHandler::new(config.clone())),
    );
    registry.register(
        stages::UPLOAD_STUDY,
        Arc::new(UploadStudyHandler::new(config.clone(), object_store.clone())),
    );
    registry.register(stages::ANALYZE, Arc::new(AnalyzeStudyHandler::new(analyzer)));
    registry.register(stages::FORMAT_REPORT, Arc::new(FormatReportHandler::new()));
    registry.register(
        stages::UPLOAD_REPORT,
        Arc::new(UploadReportHandler::new(config.clone(), object_store)),
    );

    let slice_handler = Arc::new(SliceExportHandler::new(config, exporter));
    registry.register(stages::UPLOAD_SLICES, slice_handler.clone());
    registry.register(stages::EXTRACT_SLICES, slice_handler);

    registry.register(stages::AGGREGATE, Arc::new(AggregateHandler::new()));

    registry
}
