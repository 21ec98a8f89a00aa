//! # Built-in Pipeline Catalog
//!
//! The static pipeline topologies, one per study kind, built once at
//! process start:
//!
//! - `cbct`: validate, then a report branch (analyze, format_report,
//!   upload_report) concurrent with a slice-export branch (upload_slices),
//!   joined into aggregate
//! - `pano`: validate, upload_study and analyze in a linear chain, then
//!   aggregate
//! - `nifti`: extract_slices, then aggregate

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::StudyKind;

use super::definition::{Branch, PipelineDefinition, PipelineResult};

/// Stage names used by the built-in pipelines
pub mod stages {
    pub const VALIDATE: &str = "validate";
    pub const UPLOAD_STUDY: &str = "upload_study";
    pub const ANALYZE: &str = "analyze";
    pub const FORMAT_REPORT: &str = "format_report";
    pub const UPLOAD_REPORT: &str = "upload_report";
    pub const UPLOAD_SLICES: &str = "upload_slices";
    pub const EXTRACT_SLICES: &str = "extract_slices";
    pub const AGGREGATE: &str = "aggregate";
}

/// Branch names used by the built-in CBCT pipeline
pub mod branches {
    pub const REPORT: &str = "report";
    pub const SLICES: &str = "slices";
}

/// Immutable mapping from study kind to pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineCatalog {
    definitions: HashMap<StudyKind, Arc<PipelineDefinition>>,
}

impl PipelineCatalog {
    /// Build the catalog of built-in pipelines
    pub fn builtin() -> PipelineResult<Self> {
        let mut definitions = HashMap::new();
        definitions.insert(StudyKind::Cbct, Arc::new(cbct_pipeline()?));
        definitions.insert(StudyKind::Pano, Arc::new(pano_pipeline()?));
        definitions.insert(StudyKind::Nifti, Arc::new(nifti_pipeline()?));
        Ok(Self { definitions })
    }

    pub fn definition(&self, kind: StudyKind) -> Option<Arc<PipelineDefinition>> {
        self.definitions.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<StudyKind> {
        let mut kinds: Vec<StudyKind> = self.definitions.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn cbct_pipeline() -> PipelineResult<PipelineDefinition> {
    PipelineDefinition::builder("cbct")
        .stage(stages::VALIDATE)
        .group(vec![
            Branch::new(
                branches::REPORT,
                [stages::ANALYZE, stages::FORMAT_REPORT, stages::UPLOAD_REPORT],
            ),
            Branch::new(branches::SLICES, [stages::UPLOAD_SLICES]),
        ])
        .finalize(stages::AGGREGATE)
        .build()
}

fn pano_pipeline() -> PipelineResult<PipelineDefinition> {
    PipelineDefinition::builder("pano")
        .stage(stages::VALIDATE)
        .stage(stages::UPLOAD_STUDY)
        .stage(stages::ANALYZE)
        .finalize(stages::AGGREGATE)
        .build()
}

fn nifti_pipeline() -> PipelineResult<PipelineDefinition> {
    PipelineDefinition::builder("nifti")
        .stage(stages::EXTRACT_SLICES)
        .finalize(stages::AGGREGATE)
        .build()
}
