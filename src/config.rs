//! # Configuration Manager
//!
//! ## Architecture: YAML-driven Configuration System
//!
//! The ConfigurationManager provides typed configuration for the
//! orchestration core: execution limits, retry/backoff policy, storage
//! locations and dispatch behavior, with environment-variable interpolation
//! and per-environment overrides.
//!
//! ## Configuration Structure:
//!
//! ```yaml
//! # dentalflow-config.yaml
//! execution:
//!   max_active_runs: 100
//!   default_stage_timeout_seconds: 1800
//!
//! backoff:
//!   max_attempts: 3
//!   base_delay_ms: 1000
//!   jitter_enabled: true
//!
//! storage:
//!   database_url: "${DENTALFLOW_DATABASE_URL}"
//!   report_bucket: "reports"
//! ```
//!
//! ## Usage:
//!
//! ```rust
//! use dentalflow_core::config::ConfigurationManager;
//!
//! let yaml = r#"
//! execution:
//!   max_active_runs: 25
//! backoff:
//!   max_attempts: 5
//! "#;
//!
//! let manager = ConfigurationManager::load_from_yaml(yaml)?;
//! let config = manager.system_config();
//!
//! assert_eq!(config.execution.max_active_runs, 25);
//! assert_eq!(config.backoff.max_attempts, 5);
//! assert!(config.backoff.jitter_enabled); // Default is true
//! # Ok::<(), dentalflow_core::config::ConfigError>(())
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn load(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main system configuration for the orchestration core
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DentalflowConfig {
    pub execution: ExecutionConfig,
    pub backoff: BackoffConfig,
    pub storage: StorageConfig,
    pub dispatch: DispatchConfig,
    pub telemetry: TelemetryConfig,
    /// Environment-specific overrides, keyed by environment name
    pub environments: Option<HashMap<String, EnvironmentOverrides>>,
}

impl DentalflowConfig {
    /// Configuration tuned for fast unit and integration tests
    pub fn for_testing() -> Self {
        Self {
            execution: ExecutionConfig {
                max_concurrent_stages: 4,
                max_active_runs: 8,
                default_stage_timeout_seconds: 5,
                event_channel_capacity: 64,
            },
            backoff: BackoffConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
                jitter_enabled: false,
            },
            storage: StorageConfig::default(),
            dispatch: DispatchConfig::default(),
            telemetry: TelemetryConfig::default(),
            environments: None,
        }
    }
}

/// Execution limits for the pipeline executor and work queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Stage invocations allowed to execute concurrently per process
    pub max_concurrent_stages: usize,
    /// Active (non-terminal) runs accepted before backpressure kicks in
    pub max_active_runs: usize,
    /// Wall-clock budget for one stage invocation
    pub default_stage_timeout_seconds: u64,
    /// Capacity of the lifecycle event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 8,
            max_active_runs: 100,
            default_stage_timeout_seconds: 1800,
            event_channel_capacity: 1000,
        }
    }
}

/// Retry and backoff policy for transient stage failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Total invocation attempts per stage, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

/// Storage locations and intake validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database URL for the durable result store; `None` selects the
    /// in-memory store
    pub database_url: Option<String>,
    /// Directory where the intake service stages raw uploads
    pub staging_directory: String,
    /// Root directory of the local object store
    pub artifact_root: String,
    pub report_bucket: String,
    pub slice_bucket: String,
    pub image_bucket: String,
    /// Size cap for volumetric uploads (CBCT, NIfTI)
    pub max_volume_bytes: u64,
    /// Size cap for 2D image uploads (panoramic)
    pub max_image_bytes: u64,
    pub volumetric_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    /// How long terminal runs are kept before `prune_expired` may drop them
    pub result_retention_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            staging_directory: "temp_uploads".to_string(),
            artifact_root: "artifacts".to_string(),
            report_bucket: "reports".to_string(),
            slice_bucket: "slices".to_string(),
            image_bucket: "images".to_string(),
            max_volume_bytes: 1024 * 1024 * 1024,
            max_image_bytes: 50 * 1024 * 1024,
            volumetric_extensions: vec![
                ".nii".to_string(),
                ".nii.gz".to_string(),
                ".dcm".to_string(),
                ".dicom".to_string(),
                ".ima".to_string(),
            ],
            image_extensions: vec![
                ".jpg".to_string(),
                ".jpeg".to_string(),
                ".png".to_string(),
                ".tiff".to_string(),
                ".tif".to_string(),
                ".bmp".to_string(),
            ],
            result_retention_seconds: 3600,
        }
    }
}

/// Dispatch behavior for workflow submission
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    pub duplicate_policy: DuplicatePolicy,
}

/// Policy for `start_workflow` on a study that already has an active run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Idempotent submission: return the in-flight run's identifier
    #[default]
    ReturnExisting,
    /// Refuse the submission, naming the existing run
    Reject,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReturnExisting => write!(f, "return_existing"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "return_existing" => Ok(Self::ReturnExisting),
            "reject" => Ok(Self::Reject),
            _ => Err(format!("Invalid duplicate policy: {s}")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logging: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            service_name: "dentalflow-core-rs".to_string(),
        }
    }
}

/// Environment-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnvironmentOverrides {
    pub max_active_runs: Option<usize>,
    pub default_stage_timeout_seconds: Option<u64>,
    pub log_level: Option<String>,
}

/// Main configuration manager
pub struct ConfigurationManager {
    system_config: Arc<DentalflowConfig>,
    environment: String,
}

impl ConfigurationManager {
    /// Create a new configuration manager with default configuration
    pub fn new() -> Self {
        Self {
            system_config: Arc::new(DentalflowConfig::default()),
            environment: Self::detect_environment(),
        }
    }

    /// Load configuration from a YAML file
    #[instrument]
    pub async fn load_from_file<P: AsRef<Path> + std::fmt::Debug>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::load(format!("{path:?}"), format!("read failed: {e}")))?;

        let manager = Self::load_from_yaml(&content)
            .map_err(|e| ConfigError::load(format!("{path:?}"), e.to_string()))?;

        debug!("Configuration loaded successfully");
        Ok(manager)
    }

    /// Load configuration from a YAML string
    pub fn load_from_yaml(yaml_content: &str) -> ConfigResult<Self> {
        let interpolated_content = Self::interpolate_env_vars(yaml_content);
        let mut config: DentalflowConfig = serde_yaml::from_str(&interpolated_content)
            .map_err(|e| ConfigError::load("yaml_string", format!("parse failed: {e}")))?;

        let environment = Self::detect_environment();
        Self::apply_environment_overrides(&mut config, &environment);
        Self::validate(&config)?;

        Ok(Self {
            system_config: Arc::new(config),
            environment,
        })
    }

    /// Get the system configuration
    pub fn system_config(&self) -> Arc<DentalflowConfig> {
        Arc::clone(&self.system_config)
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn detect_environment() -> String {
        std::env::var("DENTALFLOW_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// Apply environment-specific overrides to the base configuration
    fn apply_environment_overrides(config: &mut DentalflowConfig, environment: &str) {
        let overrides = config
            .environments
            .as_ref()
            .and_then(|envs| envs.get(environment))
            .cloned();

        if let Some(overrides) = overrides {
            if let Some(max_active_runs) = overrides.max_active_runs {
                config.execution.max_active_runs = max_active_runs;
            }
            if let Some(timeout) = overrides.default_stage_timeout_seconds {
                config.execution.default_stage_timeout_seconds = timeout;
            }
            if let Some(log_level) = overrides.log_level {
                config.telemetry.log_level = log_level;
            }
        }
    }

    /// Interpolate environment variables in configuration strings
    fn interpolate_env_vars(template: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
        re.replace_all(template, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{var_name}}}"))
        })
        .to_string()
    }

    /// Validate configuration constraints
    pub fn validate(config: &DentalflowConfig) -> ConfigResult<()> {
        if config.execution.max_concurrent_stages == 0 {
            return Err(ConfigError::invalid(
                "execution.max_concurrent_stages",
                "must be at least 1",
            ));
        }

        if config.execution.max_active_runs == 0 {
            return Err(ConfigError::invalid(
                "execution.max_active_runs",
                "must be at least 1",
            ));
        }

        if config.execution.default_stage_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "execution.default_stage_timeout_seconds",
                "must be at least 1",
            ));
        }

        if config.backoff.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "backoff.max_attempts",
                "must be at least 1",
            ));
        }

        if config.backoff.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "backoff.multiplier",
                "must be at least 1.0",
            ));
        }

        if config.backoff.max_delay_ms < config.backoff.base_delay_ms {
            return Err(ConfigError::invalid(
                "backoff.max_delay_ms",
                "must be at least base_delay_ms",
            ));
        }

        if config.storage.report_bucket.is_empty()
            || config.storage.slice_bucket.is_empty()
            || config.storage.image_bucket.is_empty()
        {
            return Err(ConfigError::invalid(
                "storage",
                "bucket names cannot be empty",
            ));
        }

        for ext in config
            .storage
            .volumetric_extensions
            .iter()
            .chain(config.storage.image_extensions.iter())
        {
            if !ext.starts_with('.') {
                return Err(ConfigError::invalid(
                    "storage.extensions",
                    format!("extension '{ext}' must start with '.'"),
                ));
            }
        }

        Ok(())
    }
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}
