//! Settings of the built-in sinks. The MQTT section lives in the transport crate.

use std::{net::SocketAddr, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// `[console]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleSinkConfig {
    pub enabled: bool,
}

impl Default for ConsoleSinkConfig {
    fn default() -> Self {
        ConsoleSinkConfig { enabled: true }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// How long observations stay in the history.
    #[validate(range(min = 1, message = "Retention must be at least 1 minute"))]
    pub retention_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            retention_minutes: 60,
        }
    }
}

impl CacheConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }
}

/// `[http]` section of the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,

    /// Listen address.
    #[validate(custom(function = "validate_bind"))]
    pub bind: String,

    /// Fields of each record drawn as lines on the chart. Empty means the
    /// fields of the configured source.
    pub y_axis: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            enabled: true,
            bind: "0.0.0.0:2999".to_string(),
            y_axis: Vec::new(),
        }
    }
}

fn validate_bind(bind: &str) -> Result<(), ValidationError> {
    bind.parse::<SocketAddr>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("invalid_bind");
        err.message = Some(format!("Invalid listen address: {bind}").into());
        err
    })
}
