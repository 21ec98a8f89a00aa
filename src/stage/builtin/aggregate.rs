//! Finalize stage. Folds the full set of stage outcomes into one closing
//! report: successful payloads keyed by stage plus an explicit record of
//! every stage that did not succeed. Failures here are aggregation errors,
//! which the executor treats as non-retryable.

use chrono::Utc;

use crate::model::{StageError, StageErrorKind};
use crate::stage::handler::{StageContext, StageHandler};

pub struct AggregateHandler;

impl AggregateHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AggregateHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StageHandler for AggregateHandler {
    async fn process(&self, context: &StageContext) -> Result<serde_json::Value, StageError> {
        if context.upstream.is_empty() {
            return Err(StageError::aggregation(
                "no stage results available at finalization",
            ));
        }

        let mut stage_names: Vec<&String> = context.upstream.keys().collect();
        stage_names.sort();

        let mut results = serde_json::Map::new();
        let mut failures = Vec::new();
        for stage in stage_names {
            // Join barrier means every result here is terminal, but a
            // non-success of any shape still lands in the failure record
            let result = &context.upstream[stage];
            if result.is_success() {
                let payload = result.payload.clone().unwrap_or(serde_json::Value::Null);
                results.insert(stage.clone(), payload);
            } else {
                let kind = result.error_kind().unwrap_or(StageErrorKind::Permanent);
                let message = result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "stage did not complete".to_string());
                failures.push(serde_json::json!({
                    "stage": stage,
                    "kind": kind,
                    "message": message,
                    "attempts": result.attempt,
                }));
            }
        }

        let succeeded = results.len();
        let failed = failures.len();

        Ok(serde_json::json!({
            "run_id": context.run_id,
            "study_id": context.study.study_id,
            "pipeline": context.pipeline,
            "aggregated_at": Utc::now(),
            "complete": failed == 0,
            "stage_totals": {
                "succeeded": succeeded,
                "failed": failed,
            },
            "results": results,
            "failures": failures,
        }))
    }
}
