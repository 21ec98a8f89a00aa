//! # Stage Handler Registry
//!
//! Maps stage names to handler implementations. The registry is built once
//! at process start and handed to the executor by reference; there is no
//! ambient global registration.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use super::handler::StageHandler;

/// Thread-safe registry of stage handlers
#[derive(Default)]
pub struct StageRegistry {
    handlers: DashMap<String, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a stage name, replacing any existing one
    pub fn register(&self, stage: impl Into<String>, handler: Arc<dyn StageHandler>) {
        let stage = stage.into();
        info!(stage = %stage, "📚 STAGE_REGISTRY: Handler registered");
        self.handlers.insert(stage, handler);
    }

    /// Look up the handler for a stage name
    pub fn get(&self, stage: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(stage).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.handlers.contains_key(stage)
    }

    /// Registered stage names, sorted for deterministic listings
    pub fn stage_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.stage_names())
            .finish()
    }
}
