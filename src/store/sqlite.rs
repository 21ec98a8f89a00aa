//! SQLite-backed result store. Runs and stage results survive process
//! restart, which is what allows in-flight runs to be resumed instead of
//! silently lost. The terminal-result guard is enforced in SQL with a
//! conditional upsert so concurrent duplicate writers race safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{RunStatus, StageError, StageOutcome, StageResult, StudyKind, StudyRef, WorkflowRun};

use super::{RecordOutcome, ResultStore, StoreError, StoreResult};

const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_runs (
    run_id TEXT PRIMARY KEY,
    study_id TEXT NOT NULL,
    study_json TEXT NOT NULL,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
)
"#;

const CREATE_RUNS_STUDY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_workflow_runs_study ON workflow_runs (study_id, status)
"#;

const CREATE_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stage_results (
    run_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    outcome TEXT NOT NULL,
    payload_json TEXT,
    error_json TEXT,
    attempt INTEGER NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (run_id, stage)
)
"#;

/// Durable store on sqlx/SQLite
#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    /// Connect to the given SQLite URL and run schema migration
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::database_connection(e.to_string()))?
            .create_if_missing(true);

        // An in-memory database exists per connection; a single connection
        // keeps the pool looking at one database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(database_url = %database_url, "💾 RESULT_STORE: SQLite store ready");
        Ok(store)
    }

    /// In-memory SQLite database for tests
    pub async fn new_in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Close the underlying connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in [CREATE_RUNS_TABLE, CREATE_RUNS_STUDY_INDEX, CREATE_RESULTS_TABLE] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::migration(e.to_string()))?;
        }
        debug!("Result store schema is current");
        Ok(())
    }

    fn run_from_row(row: &SqliteRow) -> StoreResult<WorkflowRun> {
        let run_id: String = row.try_get("run_id")?;
        let run_id = Uuid::parse_str(&run_id)
            .map_err(|e| StoreError::serialization(format!("invalid run_id: {e}")))?;

        let study_json: String = row.try_get("study_json")?;
        let study: StudyRef = serde_json::from_str(&study_json)?;

        let pipeline: String = row.try_get("pipeline")?;
        let pipeline = pipeline
            .parse::<StudyKind>()
            .map_err(StoreError::serialization)?;

        let status: String = row.try_get("status")?;
        let status = status
            .parse::<RunStatus>()
            .map_err(StoreError::serialization)?;

        Ok(WorkflowRun {
            run_id,
            study,
            pipeline,
            status,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        })
    }

    fn result_from_row(row: &SqliteRow) -> StoreResult<StageResult> {
        let run_id: String = row.try_get("run_id")?;
        let run_id = Uuid::parse_str(&run_id)
            .map_err(|e| StoreError::serialization(format!("invalid run_id: {e}")))?;

        let outcome: String = row.try_get("outcome")?;
        let outcome = outcome
            .parse::<StageOutcome>()
            .map_err(StoreError::serialization)?;

        let payload = row
            .try_get::<Option<String>, _>("payload_json")?
            .map(|json| serde_json::from_str::<serde_json::Value>(&json))
            .transpose()?;

        let error = row
            .try_get::<Option<String>, _>("error_json")?
            .map(|json| serde_json::from_str::<StageError>(&json))
            .transpose()?;

        Ok(StageResult {
            run_id,
            stage: row.try_get("stage")?,
            outcome,
            payload,
            error,
            attempt: row.try_get::<i64, _>("attempt")? as u32,
            completed_at: row.try_get::<DateTime<Utc>, _>("completed_at")?,
        })
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn create_run(&self, run: &WorkflowRun) -> StoreResult<()> {
        let study_json = serde_json::to_string(&run.study)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (run_id, study_id, study_json, pipeline, status, created_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.study.study_id)
        .bind(study_json)
        .bind(run.pipeline.to_string())
        .bind(run.status.to_string())
        .bind(run.created_at)
        .bind(run.updated_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database_query("create_run", e.to_string()))?;

        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE run_id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::run_from_row(&r)).transpose()
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> StoreResult<()> {
        let now = Utc::now();
        let completed_at = if status.is_terminal() { Some(now) } else { None };

        // The status filter makes terminal runs immutable in the same
        // statement that writes, so late drivers cannot reopen them
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = ?1, updated_at = ?2, completed_at = COALESCE(completed_at, ?3)
            WHERE run_id = ?4 AND status IN ('pending', 'running')
            "#,
        )
        .bind(status.to_string())
        .bind(now)
        .bind(completed_at)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Zero rows is either a missing run or a terminal one; only
            // the former is an error
            let exists = sqlx::query("SELECT 1 FROM workflow_runs WHERE run_id = ?1")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if !exists {
                return Err(StoreError::run_not_found(run_id));
            }
        }
        Ok(())
    }

    async fn find_active_run_for_study(&self, study_id: &str) -> StoreResult<Option<WorkflowRun>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM workflow_runs
            WHERE study_id = ?1 AND status IN ('pending', 'running')
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(study_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::run_from_row(&r)).transpose()
    }

    async fn list_active_runs(&self) -> StoreResult<Vec<WorkflowRun>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_runs
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn count_active_runs(&self) -> StoreResult<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS active FROM workflow_runs WHERE status IN ('pending', 'running')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("active")? as usize)
    }

    async fn record(&self, result: &StageResult) -> StoreResult<RecordOutcome> {
        let payload_json = result
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error_json = result
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // The conditional upsert only replaces a non-terminal row; zero rows
        // affected means a terminal result exists and this write lost
        let outcome = sqlx::query(
            r#"
            INSERT INTO stage_results
                (run_id, stage, outcome, payload_json, error_json, attempt, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (run_id, stage) DO UPDATE SET
                outcome = excluded.outcome,
                payload_json = excluded.payload_json,
                error_json = excluded.error_json,
                attempt = excluded.attempt,
                completed_at = excluded.completed_at
            WHERE stage_results.outcome = 'retrying'
            "#,
        )
        .bind(result.run_id.to_string())
        .bind(&result.stage)
        .bind(result.outcome.to_string())
        .bind(payload_json)
        .bind(error_json)
        .bind(result.attempt as i64)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database_query("record", e.to_string()))?;

        if outcome.rows_affected() > 0 {
            return Ok(RecordOutcome::Recorded);
        }

        let existing = self
            .get_stage_result(result.run_id, &result.stage)
            .await?
            .ok_or_else(|| {
                StoreError::database_query("record", "conflicting row disappeared mid-write")
            })?;
        Ok(RecordOutcome::AlreadyTerminal(Box::new(existing)))
    }

    async fn read_all(&self, run_id: Uuid) -> StoreResult<Vec<StageResult>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stage_results
            WHERE run_id = ?1
            ORDER BY completed_at ASC, stage ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::result_from_row).collect()
    }

    async fn get_stage_result(
        &self,
        run_id: Uuid,
        stage: &str,
    ) -> StoreResult<Option<StageResult>> {
        let row = sqlx::query("SELECT * FROM stage_results WHERE run_id = ?1 AND stage = ?2")
            .bind(run_id.to_string())
            .bind(stage)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::result_from_row(&r)).transpose()
    }

    async fn prune_expired(&self, retention: Duration) -> StoreResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM stage_results WHERE run_id IN (
                SELECT run_id FROM workflow_runs
                WHERE status IN ('succeeded', 'partially_failed', 'failed')
                  AND completed_at IS NOT NULL
                  AND completed_at < ?1
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM workflow_runs
            WHERE status IN ('succeeded', 'partially_failed', 'failed')
              AND completed_at IS NOT NULL
              AND completed_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(removed.rows_affected())
    }
}
