//! Scheduler and source configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// `[executor]` section: timing and failure policy of the polling loop.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deployment name; topics, client id and the dashboard title derive from it.
    #[validate(length(min = 1, max = 128, message = "Name must be between 1 and 128 characters"))]
    pub name: String,

    /// Seconds between two ticks.
    #[validate(range(min = 1, message = "Interval must be at least 1 second"))]
    pub interval: u64,

    /// Consecutive failures tolerated before stopping. 0 disables the limit.
    pub fail_budget: u32,

    /// Count sink failures against the budget as well.
    pub fail_on_consume: bool,

    /// Debug logging for the whole process and verbose component output.
    pub debug: bool,

    /// Seconds `main` waits for a clean stop before exiting forcibly.
    #[validate(range(min = 1, message = "Grace period must be at least 1 second"))]
    pub grace_period: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            name: "pollbee".to_string(),
            interval: 15,
            fail_budget: 10,
            fail_on_consume: false,
            debug: false,
            grace_period: 5,
        }
    }
}

impl ExecutorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }
}

/// Which built-in source the binary runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Random,
    Uptime,
}

impl SourceKind {
    /// Record fields the dashboard draws when `[http] y_axis` is not set.
    pub fn default_marks(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Random => &["value"],
            SourceKind::Uptime => &["uptime_seconds", "idle_time_seconds"],
        }
    }
}

/// `[source]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,

    /// Fixed seed for the random source; entropy when absent.
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_defaults() {
        let config = ExecutorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval(), Duration::from_secs(15));
        assert_eq!(config.fail_budget, 10);
        assert!(!config.fail_on_consume);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ExecutorConfig {
            interval: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("interval"));
    }

    #[test]
    fn test_source_kind_from_toml() {
        let source: SourceConfig = toml::from_str("kind = \"uptime\"").unwrap();
        assert_eq!(source.kind, SourceKind::Uptime);
        assert!(source.seed.is_none());

        let source: SourceConfig = toml::from_str("seed = 7").unwrap();
        assert_eq!(source.kind, SourceKind::Random);
        assert_eq!(source.seed, Some(7));
    }
}
