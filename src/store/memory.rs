//! In-memory result store backed by sharded concurrent maps. Used by unit
//! tests and non-durable deployments; runs do not survive process restart.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{RunStatus, StageResult, WorkflowRun};

use super::{RecordOutcome, ResultStore, StoreError, StoreResult};

/// Non-durable store for tests and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    runs: DashMap<Uuid, WorkflowRun>,
    results: DashMap<(Uuid, String), StageResult>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn create_run(&self, run: &WorkflowRun) -> StoreResult<()> {
        match self.runs.entry(run.run_id) {
            Entry::Occupied(_) => Err(StoreError::database_query(
                "create_run",
                format!("run {} already exists", run.run_id),
            )),
            Entry::Vacant(entry) => {
                entry.insert(run.clone());
                Ok(())
            }
        }
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> StoreResult<()> {
        let mut run = self
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::run_not_found(run_id))?;
        // Terminal status is immutable; a late writer loses silently
        if run.status.is_terminal() {
            return Ok(());
        }
        let now = Utc::now();
        run.status = status;
        run.updated_at = now;
        if status.is_terminal() && run.completed_at.is_none() {
            run.completed_at = Some(now);
        }
        Ok(())
    }

    async fn find_active_run_for_study(&self, study_id: &str) -> StoreResult<Option<WorkflowRun>> {
        Ok(self
            .runs
            .iter()
            .find(|entry| entry.study.study_id == study_id && entry.status.is_active())
            .map(|entry| entry.clone()))
    }

    async fn list_active_runs(&self) -> StoreResult<Vec<WorkflowRun>> {
        let mut active: Vec<WorkflowRun> = self
            .runs
            .iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.clone())
            .collect();
        active.sort_by_key(|run| run.created_at);
        Ok(active)
    }

    async fn count_active_runs(&self) -> StoreResult<usize> {
        Ok(self
            .runs
            .iter()
            .filter(|entry| entry.status.is_active())
            .count())
    }

    async fn record(&self, result: &StageResult) -> StoreResult<RecordOutcome> {
        let key = (result.run_id, result.stage.clone());
        // The entry guard makes check-then-write atomic per key, which is
        // what enforces first-writer-wins under duplicate invocations
        match self.results.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_terminal() {
                    Ok(RecordOutcome::AlreadyTerminal(Box::new(entry.get().clone())))
                } else {
                    entry.insert(result.clone());
                    Ok(RecordOutcome::Recorded)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(result.clone());
                Ok(RecordOutcome::Recorded)
            }
        }
    }

    async fn read_all(&self, run_id: Uuid) -> StoreResult<Vec<StageResult>> {
        let mut results: Vec<StageResult> = self
            .results
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect();
        results.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.stage.cmp(&b.stage))
        });
        Ok(results)
    }

    async fn get_stage_result(
        &self,
        run_id: Uuid,
        stage: &str,
    ) -> StoreResult<Option<StageResult>> {
        Ok(self
            .results
            .get(&(run_id, stage.to_string()))
            .map(|r| r.clone()))
    }

    async fn prune_expired(&self, retention: Duration) -> StoreResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());

        let expired: Vec<Uuid> = self
            .runs
            .iter()
            .filter(|entry| {
                entry.status.is_terminal()
                    && entry.completed_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|entry| entry.run_id)
            .collect();

        for run_id in &expired {
            self.runs.remove(run_id);
            self.results.retain(|key, _| key.0 != *run_id);
        }

        Ok(expired.len() as u64)
    }
}
