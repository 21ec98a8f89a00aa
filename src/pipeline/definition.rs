//! # Pipeline Definitions
//!
//! Declarative description of a workflow as an ordered list of nodes: plain
//! stages executed sequentially, groups of branches executed concurrently,
//! and a mandatory finalize stage at the tail. Definitions are immutable
//! once built; structural rules are enforced by the builder so the executor
//! can walk a definition without revalidating it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Pipeline definition error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline '{pipeline}' has no stages before finalize")]
    EmptyPipeline { pipeline: String },

    #[error("Pipeline '{pipeline}' contains a group with no branches")]
    EmptyGroup { pipeline: String },

    #[error("Branch '{branch}' in pipeline '{pipeline}' has no stages")]
    EmptyBranch { pipeline: String, branch: String },

    #[error("Stage '{stage}' appears more than once in pipeline '{pipeline}'")]
    DuplicateStage { pipeline: String, stage: String },

    #[error("Branch '{branch}' appears more than once in pipeline '{pipeline}'")]
    DuplicateBranch { pipeline: String, branch: String },

    #[error("Pipeline '{pipeline}' is missing a finalize stage")]
    MissingFinalize { pipeline: String },
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// One concurrent sub-sequence inside a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    /// Stages executed strictly in order within the branch
    pub stages: Vec<String>,
}

impl Branch {
    pub fn new<S: Into<String>>(name: impl Into<String>, stages: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            stages: stages.into_iter().map(Into::into).collect(),
        }
    }

    /// Name of the branch's final stage
    pub fn last_stage(&self) -> Option<&str> {
        self.stages.last().map(String::as_str)
    }

    pub fn contains_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// One node in a pipeline's top-level sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineNode {
    /// Single stage, gated on every preceding node's success
    Stage(String),
    /// Branches submitted concurrently and synchronized at a join barrier
    Group(Vec<Branch>),
}

/// Immutable description of one workflow topology.
///
/// The top-level nodes form a sequence; a failing node short-circuits the
/// nodes after it. The finalize stage is not part of the sequence: it runs
/// exactly once after the last node completes, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    name: String,
    nodes: Vec<PipelineNode>,
    finalize_stage: String,
}

impl PipelineDefinition {
    pub fn builder(name: impl Into<String>) -> PipelineDefinitionBuilder {
        PipelineDefinitionBuilder {
            name: name.into(),
            nodes: Vec::new(),
            finalize_stage: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    pub fn finalize_stage(&self) -> &str {
        &self.finalize_stage
    }

    /// Every stage name except finalize, in submission order (branch stages
    /// in branch declaration order)
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for node in &self.nodes {
            match node {
                PipelineNode::Stage(stage) => names.push(stage.as_str()),
                PipelineNode::Group(branches) => {
                    for branch in branches {
                        names.extend(branch.stages.iter().map(String::as_str));
                    }
                }
            }
        }
        names
    }

    /// Total stage count including finalize, used for progress reporting
    pub fn total_stages(&self) -> usize {
        self.stage_names().len() + 1
    }

    /// All branches across every group node
    pub fn branches(&self) -> Vec<&Branch> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                PipelineNode::Group(branches) => Some(branches.iter()),
                PipelineNode::Stage(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn contains_stage(&self, stage: &str) -> bool {
        stage == self.finalize_stage || self.stage_names().contains(&stage)
    }
}

/// Builder enforcing the structural rules of a pipeline definition
pub struct PipelineDefinitionBuilder {
    name: String,
    nodes: Vec<PipelineNode>,
    finalize_stage: Option<String>,
}

impl PipelineDefinitionBuilder {
    /// Append a single sequential stage
    pub fn stage(mut self, name: impl Into<String>) -> Self {
        self.nodes.push(PipelineNode::Stage(name.into()));
        self
    }

    /// Append a group of concurrent branches
    pub fn group(mut self, branches: Vec<Branch>) -> Self {
        self.nodes.push(PipelineNode::Group(branches));
        self
    }

    /// Set the terminal finalize stage
    pub fn finalize(mut self, name: impl Into<String>) -> Self {
        self.finalize_stage = Some(name.into());
        self
    }

    pub fn build(self) -> PipelineResult<PipelineDefinition> {
        let name = self.name;

        let finalize_stage = self
            .finalize_stage
            .ok_or_else(|| PipelineError::MissingFinalize {
                pipeline: name.clone(),
            })?;

        if self.nodes.is_empty() {
            return Err(PipelineError::EmptyPipeline { pipeline: name });
        }

        let mut seen_stages: HashSet<&str> = HashSet::new();
        let mut seen_branches: HashSet<&str> = HashSet::new();

        for node in &self.nodes {
            match node {
                PipelineNode::Stage(stage) => {
                    if !seen_stages.insert(stage.as_str()) {
                        return Err(PipelineError::DuplicateStage {
                            pipeline: name,
                            stage: stage.clone(),
                        });
                    }
                }
                PipelineNode::Group(branches) => {
                    if branches.is_empty() {
                        return Err(PipelineError::EmptyGroup { pipeline: name });
                    }
                    for branch in branches {
                        if branch.stages.is_empty() {
                            return Err(PipelineError::EmptyBranch {
                                pipeline: name,
                                branch: branch.name.clone(),
                            });
                        }
                        if !seen_branches.insert(branch.name.as_str()) {
                            return Err(PipelineError::DuplicateBranch {
                                pipeline: name,
                                branch: branch.name.clone(),
                            });
                        }
                        for stage in &branch.stages {
                            if !seen_stages.insert(stage.as_str()) {
                                return Err(PipelineError::DuplicateStage {
                                    pipeline: name,
                                    stage: stage.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if seen_stages.contains(finalize_stage.as_str()) {
            return Err(PipelineError::DuplicateStage {
                pipeline: name,
                stage: finalize_stage,
            });
        }

        Ok(PipelineDefinition {
            name,
            nodes: self.nodes,
            finalize_stage,
        })
    }
}
