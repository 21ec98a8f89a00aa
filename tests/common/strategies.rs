use proptest::prelude::*;
use uuid::Uuid;

use dentalflow_core::config::BackoffConfig;
use dentalflow_core::model::{RunStatus, StageError, StageErrorKind, StageResult};
use dentalflow_core::state_machine::RunEvent;

/// Strategy for generating run identifiers
pub fn run_id_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for generating stage names from the built-in catalog
pub fn stage_name_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("validate"),
        Just("upload_study"),
        Just("analyze"),
        Just("format_report"),
        Just("upload_report"),
        Just("upload_slices"),
        Just("extract_slices"),
    ]
}

/// Strategy for generating stage payloads
pub fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        Just(serde_json::json!({"teeth_detected": 28})),
        Just(serde_json::json!({"findings": [{"label": "caries", "confidence": 0.93}]})),
        Just(serde_json::json!({"destination": {"bucket": "slices", "total_slices": 96}})),
        Just(serde_json::json!({"nested": {"shape": [256, 256, 192]}})),
    ]
}

/// Strategy for generating stage error kinds
pub fn error_kind_strategy() -> impl Strategy<Value = StageErrorKind> {
    prop_oneof![
        Just(StageErrorKind::Transient),
        Just(StageErrorKind::Permanent),
        Just(StageErrorKind::Aggregation),
    ]
}

/// Strategy for generating stage errors
pub fn stage_error_strategy() -> impl Strategy<Value = StageError> {
    (error_kind_strategy(), "[a-z][a-z ]{0,40}")
        .prop_map(|(kind, message)| StageError { kind, message })
}

/// Strategy for generating one terminal result for the given (run, stage)
pub fn terminal_result_strategy(
    run_id: Uuid,
    stage: &'static str,
) -> impl Strategy<Value = StageResult> {
    (any::<bool>(), payload_strategy(), stage_error_strategy(), 1u32..=3).prop_map(
        move |(succeeded, payload, error, attempt)| {
            if succeeded {
                StageResult::success(run_id, stage, payload, attempt)
            } else {
                StageResult::failure(run_id, stage, error, attempt)
            }
        },
    )
}

/// Strategy for generating a run's recorded result view: a subset of
/// distinct upstream stages with terminal outcomes, plus an optional
/// finalize result
pub fn recorded_run_strategy() -> impl Strategy<Value = (Vec<StageResult>, Option<StageResult>)> {
    run_id_strategy().prop_flat_map(|run_id| {
        (
            prop::option::of(terminal_result_strategy(run_id, "validate")),
            prop::option::of(terminal_result_strategy(run_id, "upload_study")),
            prop::option::of(terminal_result_strategy(run_id, "analyze")),
            prop::option::of(terminal_result_strategy(run_id, "format_report")),
            prop::option::of(terminal_result_strategy(run_id, "upload_slices")),
            prop::option::of(terminal_result_strategy(run_id, "aggregate")),
        )
            .prop_map(|(a, b, c, d, e, finalize)| {
                let upstream: Vec<StageResult> = [a, b, c, d, e].into_iter().flatten().collect();
                (upstream, finalize)
            })
    })
}

/// Strategy for generating terminal run statuses
pub fn terminal_status_strategy() -> impl Strategy<Value = RunStatus> {
    prop_oneof![
        Just(RunStatus::Succeeded),
        Just(RunStatus::PartiallyFailed),
        Just(RunStatus::Failed),
    ]
}

/// Strategy for generating run lifecycle events
pub fn run_event_strategy() -> impl Strategy<Value = RunEvent> {
    prop_oneof![
        Just(RunEvent::Start),
        Just(RunEvent::CompleteSuccessfully),
        Just(RunEvent::CompletePartially),
        "[a-z ]{1,24}".prop_map(RunEvent::Fail),
    ]
}

/// Strategy for generating backoff configurations with the cap at or
/// above the base delay
pub fn backoff_config_strategy() -> impl Strategy<Value = BackoffConfig> {
    (1u32..=8, 0u64..=2_000, 1.0f64..=4.0, any::<bool>()).prop_map(
        |(max_attempts, base_delay_ms, multiplier, jitter_enabled)| BackoffConfig {
            max_attempts,
            base_delay_ms,
            max_delay_ms: base_delay_ms.saturating_mul(16),
            multiplier,
            jitter_enabled,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn test_backoff_config_strategy_keeps_cap_above_base(config in backoff_config_strategy()) {
            prop_assert!(config.max_attempts >= 1);
            prop_assert!(config.max_delay_ms >= config.base_delay_ms);
        }

        #[test]
        fn test_recorded_run_strategy_yields_one_run_with_distinct_stages(
            (upstream, finalize) in recorded_run_strategy()
        ) {
            let mut stages = HashSet::new();
            let run_ids: HashSet<Uuid> = upstream
                .iter()
                .chain(finalize.iter())
                .map(|r| r.run_id)
                .collect();
            prop_assert!(run_ids.len() <= 1);
            for result in &upstream {
                prop_assert!(result.is_terminal());
                prop_assert!(stages.insert(result.stage.clone()), "duplicate stage {}", result.stage);
            }
        }
    }

    #[test]
    fn test_terminal_status_strategy_covers_only_terminal_states() {
        for status in [
            RunStatus::Succeeded,
            RunStatus::PartiallyFailed,
            RunStatus::Failed,
        ] {
            assert!(status.is_terminal());
        }
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
