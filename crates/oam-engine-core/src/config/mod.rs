//! Engine configuration (ambient stack — spec §9 constants are surfaced here
//! rather than hard-coded, per the Open Question on the retry-limit constant).

pub mod error;

pub use error::{ConfigError, ConfigResult};

use std::env;

use serde::{Deserialize, Serialize};

/// Runtime configuration for rendering and workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub backoff: BackoffConfig,
    pub runner: RunnerConfig,
    /// Default keys stripped from stamped annotations in addition to the
    /// application's `filter-annotation-keys` (spec §4.7).
    pub default_filtered_annotation_keys: Vec<String>,
    /// Whether the workflow context store keeps state in a process-local map
    /// instead of an external key-value record (spec §4.9, §5).
    pub in_memory_context_store: bool,
}

/// Backoff tuning constants (spec §4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub min_backoff_secs: f64,
    pub wait_backoff_max_secs: f64,
    pub failed_backoff_max_secs: f64,
    /// Seed value for "minimum seen attempt count", chosen high enough that the
    /// interval saturates at the cap before any counter exists (spec §4.10).
    pub initial_min_seen_attempt_count: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff_secs: 1.0,
            wait_backoff_max_secs: 60.0,
            failed_backoff_max_secs: 300.0,
            initial_min_seen_attempt_count: 15,
        }
    }
}

/// Runner-level retry tuning (spec §7, §9 Open Question — the retry cap is a
/// configuration constant; we document the chosen value here rather than
/// hard-coding it at each call site).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of consecutive runner failures before `FailedAfterRetries` is reported.
    pub max_retries: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { max_retries: 10 }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            runner: RunnerConfig::default(),
            default_filtered_annotation_keys: vec![
                "kubectl.kubernetes.io/last-applied-configuration".to_string(),
            ],
            in_memory_context_store: false,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("OAM_ENGINE_MAX_RETRIES") {
            config.runner.max_retries = v
                .parse()
                .map_err(|e| ConfigError::parse_error(format!("{e}"), "runner", "OAM_ENGINE_MAX_RETRIES"))?;
        }

        if let Ok(v) = env::var("OAM_ENGINE_IN_MEMORY_CONTEXT_STORE") {
            config.in_memory_context_store = v
                .parse()
                .map_err(|e| ConfigError::parse_error(format!("{e}"), "store", "OAM_ENGINE_IN_MEMORY_CONTEXT_STORE"))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.runner.max_retries == 0 {
            return Err(ConfigError::validation_failed(
                "max_retries must be greater than 0",
                "runner.max_retries",
            ));
        }
        if self.backoff.wait_backoff_max_secs <= 0.0 || self.backoff.failed_backoff_max_secs <= 0.0 {
            return Err(ConfigError::validation_failed(
                "backoff caps must be positive",
                "backoff",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_retries_fails_validation() {
        let mut config = EngineConfig::default();
        config.runner.max_retries = 0;
        assert!(config.validate().is_err());
    }
}
