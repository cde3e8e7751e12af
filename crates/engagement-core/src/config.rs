//! Configuration for the engagement pipeline
//!
//! Values come from an optional TOML file layered under `AEP_*` environment variables.
//! Every field has a default, so an empty file (or none at all) yields a working setup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngagementError, Result};

/// Threshold used when the configured one is not positive
pub const DEFAULT_REQUEST_THRESHOLD: f64 = 0.7;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Master switch for request detection
    pub agent_request_detection: bool,
    /// Confidence at or above which a message counts as an agent request
    pub agent_request_threshold: f64,
    /// Master switch for automatic assignment
    pub agent_assignment: bool,
    /// Messages are truncated to this many bytes before classification
    pub max_message_bytes: usize,
    pub presence_gc_interval_secs: u64,
    /// Idle time after which GC evicts a presence entry
    pub presence_stale_secs: u64,
    /// Idle time after which an entry stops counting as available
    pub presence_liveness_secs: u64,
    pub escalator_tick_secs: u64,
    /// Quiescence window for non-persistent alarms at max level; unset disables expiry
    pub alarm_soft_expiry_secs: Option<u64>,
    pub timeout_retry_attempts: u32,
    pub timeout_retry_backoff_ms: u64,
    /// Per-subscriber queue depth of the in-process push hub
    pub push_queue_capacity: usize,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            agent_request_detection: true,
            agent_request_threshold: DEFAULT_REQUEST_THRESHOLD,
            agent_assignment: true,
            max_message_bytes: 4096,
            presence_gc_interval_secs: 5 * 60,
            presence_stale_secs: 15 * 60,
            presence_liveness_secs: 10 * 60,
            escalator_tick_secs: 30,
            alarm_soft_expiry_secs: None,
            timeout_retry_attempts: 3,
            timeout_retry_backoff_ms: 100,
            push_queue_capacity: 256,
        }
    }
}

impl EngagementConfig {
    /// Parse from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional TOML file, then apply `AEP_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("AEP").try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.agent_request_threshold) {
            return Err(EngagementError::config(format!(
                "agent_request_threshold must be within [0, 1], got {}",
                self.agent_request_threshold
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(EngagementError::config("max_message_bytes must be positive"));
        }
        if self.presence_gc_interval_secs == 0 || self.escalator_tick_secs == 0 {
            return Err(EngagementError::config("loop intervals must be positive"));
        }
        if self.presence_stale_secs < self.presence_liveness_secs {
            return Err(EngagementError::config(
                "presence_stale_secs must not be shorter than presence_liveness_secs",
            ));
        }
        if self.timeout_retry_attempts == 0 {
            return Err(EngagementError::config("timeout_retry_attempts must be at least 1"));
        }
        if self.push_queue_capacity == 0 {
            return Err(EngagementError::config("push_queue_capacity must be positive"));
        }
        Ok(())
    }

    /// Threshold the classifier actually applies
    pub fn effective_threshold(&self) -> f64 {
        if self.agent_request_threshold <= 0.0 {
            DEFAULT_REQUEST_THRESHOLD
        } else {
            self.agent_request_threshold
        }
    }

    pub fn presence_gc_interval(&self) -> Duration {
        Duration::from_secs(self.presence_gc_interval_secs)
    }

    pub fn presence_stale(&self) -> Duration {
        Duration::from_secs(self.presence_stale_secs)
    }

    pub fn presence_liveness(&self) -> Duration {
        Duration::from_secs(self.presence_liveness_secs)
    }

    pub fn escalator_tick(&self) -> Duration {
        Duration::from_secs(self.escalator_tick_secs)
    }

    pub fn alarm_soft_expiry(&self) -> Option<Duration> {
        self.alarm_soft_expiry_secs.map(Duration::from_secs)
    }

    pub fn timeout_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.timeout_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngagementConfig::default();
        config.validate().unwrap();
        assert_eq!(config.presence_gc_interval(), Duration::from_secs(300));
        assert_eq!(config.presence_stale(), Duration::from_secs(900));
        assert_eq!(config.escalator_tick(), Duration::from_secs(30));
        assert_eq!(config.alarm_soft_expiry(), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngagementConfig::from_toml_str(
            r#"
            agent_request_threshold = 0.5
            escalator_tick_secs = 10
            alarm_soft_expiry_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.agent_request_threshold, 0.5);
        assert_eq!(config.escalator_tick(), Duration::from_secs(10));
        assert_eq!(config.alarm_soft_expiry(), Some(Duration::from_secs(600)));
        assert!(config.agent_assignment);
        assert_eq!(config.max_message_bytes, 4096);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let err = EngagementConfig::from_toml_str("agent_request_threshold = 1.5").unwrap_err();
        assert!(matches!(err, EngagementError::Configuration(_)));
    }

    #[test]
    fn test_stale_shorter_than_liveness_is_rejected() {
        let config = EngagementConfig {
            presence_stale_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_threshold_falls_back() {
        let config = EngagementConfig {
            agent_request_threshold: 0.0,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.effective_threshold(), DEFAULT_REQUEST_THRESHOLD);
    }
}
