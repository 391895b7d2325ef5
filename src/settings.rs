//! Orchestrator configuration.
//!
//! Loadable from a TOML file or built in code; every field has a default
//! so embedders can start from `OrchestratorConfig::default()`.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-activity-type policy. An entry with `activity_type = None`
/// configures the default queue, which serves every type without its own
/// entry and is never bounded.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    #[serde(default)]
    pub activity_type: Option<String>,
    /// Bound for the in-memory ready buffer; `None` means unbounded.
    #[serde(default)]
    pub max_queue_length: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub max_poisoned_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            activity_type: None,
            max_queue_length: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_poisoned_retries: 0,
        }
    }
}

impl ActivityConfig {
    pub fn for_type(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: Some(activity_type.into()),
            ..Self::default()
        }
    }

    pub fn with_max_queue_length(mut self, max: usize) -> Self {
        self.max_queue_length = Some(max);
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_max_poisoned_retries(mut self, max: u32) -> Self {
        self.max_poisoned_retries = max;
        self
    }
}

/// Backoff policy for retry-wrapped durable mutations.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverPolicy {
    #[serde(default = "default_recover_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_recover_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_recover_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_recover_attempts() -> u32 {
    5
}

fn default_recover_base_delay_ms() -> u64 {
    50
}

fn default_recover_max_delay_ms() -> u64 {
    5_000
}

impl Default for RecoverPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_recover_attempts(),
            base_delay_ms: default_recover_base_delay_ms(),
            max_delay_ms: default_recover_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-type queue and retry policies. At most one entry may leave
    /// `activity_type` unset; it overrides the default queue's policy.
    #[serde(default)]
    pub activities: Vec<ActivityConfig>,
    #[serde(default = "default_workers_per_queue")]
    pub workers_per_queue: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub recover: RecoverPolicy,
}

fn default_workers_per_queue() -> usize {
    1
}

fn default_event_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            activities: Vec::new(),
            workers_per_queue: default_workers_per_queue(),
            event_capacity: default_event_capacity(),
            recover: RecoverPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let data = fs::read_to_string(path)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }

    /// Policy for an activity type: its own entry, else the default-queue
    /// entry, else built-in defaults.
    pub fn activity(&self, activity_type: &str) -> ActivityConfig {
        self.activities
            .iter()
            .find(|a| a.activity_type.as_deref() == Some(activity_type))
            .or_else(|| {
                self.activities
                    .iter()
                    .find(|a| a.activity_type.is_none())
            })
            .cloned()
            .unwrap_or_default()
    }

    /// The default-queue entry, if configured.
    pub fn default_queue_config(&self) -> ActivityConfig {
        let mut cfg = self
            .activities
            .iter()
            .find(|a| a.activity_type.is_none())
            .cloned()
            .unwrap_or_default();
        // The default queue is unbounded regardless of configuration.
        cfg.max_queue_length = None;
        cfg
    }

    /// Configured typed-queue entries.
    pub fn typed_queue_configs(&self) -> impl Iterator<Item = &ActivityConfig> {
        self.activities.iter().filter(|a| a.activity_type.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let cfg: OrchestratorConfig = toml::from_str(
            r#"
            workers_per_queue = 2

            [[activities]]
            activity_type = "reports"
            max_queue_length = 8
            max_retries = 5

            [recover]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.workers_per_queue, 2);
        assert_eq!(cfg.recover.max_attempts, 3);
        let reports = cfg.activity("reports");
        assert_eq!(reports.max_queue_length, Some(8));
        assert_eq!(reports.max_retries, 5);
        // Unconfigured type falls back to defaults.
        assert_eq!(cfg.activity("other").max_retries, 3);
    }

    #[test]
    fn default_queue_is_never_bounded() {
        let cfg: OrchestratorConfig = toml::from_str(
            r#"
            [[activities]]
            max_queue_length = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.default_queue_config().max_queue_length, None);
    }
}
