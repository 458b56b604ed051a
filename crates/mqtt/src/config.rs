//! Configuration structures for the MQTT transport.
//!
//! Every struct deserializes with `serde` and is checked with `validator`, so a
//! bad broker section fails at load time instead of at connect time.
//!
//! # Topics
//!
//! Three topics are derived from the deployment name unless overridden:
//!
//! | Topic        | Default               | Usage                                  |
//! |--------------|-----------------------|----------------------------------------|
//! | state        | `nn/{name}`           | JSON payload of every sample (QoS 1)   |
//! | control      | `nn/{name}-control`   | reserved for inbound commands          |
//! | availability | `nn/{name}-aval`      | `online` per publish, `offline` as LWT |
//!
//! ```toml
//! [mqtt]
//! host = "broker.local"
//! port = 8883
//! username = "sensor"
//! password = "secret"
//!
//! [mqtt.tls]
//! ca_cert_path = "/etc/pollbee/ca.pem"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Prefix used for topics derived from the deployment name.
pub const DEFAULT_TOPIC_PREFIX: &str = "nn";

/// Main MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Whether the MQTT sink is registered at all.
    pub enabled: bool,

    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port (1883 plain, 8883 TLS).
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Client identifier. Empty means `{name}-pollbee`.
    #[validate(length(max = 64, message = "Client id must not exceed 64 characters"))]
    pub client_id: String,

    /// Optional broker username. Only sent when non-empty.
    pub username: Option<String>,

    /// Password paired with `username`.
    pub password: Option<String>,

    /// State topic override.
    pub topic: Option<String>,

    /// Control topic override.
    pub control_topic: Option<String>,

    /// Availability topic override.
    pub availability_topic: Option<String>,

    /// Keep-alive interval in seconds.
    #[validate(range(min = 5, max = 3600, message = "Keep alive must be between 5 and 3600 seconds"))]
    pub keep_alive: u64,

    /// Start every session clean.
    pub clean_session: bool,

    /// Maximum number of unacknowledged QoS 1/2 publishes.
    #[validate(range(min = 1, message = "Max inflight must be at least 1"))]
    pub max_inflight: u16,

    /// Capacity of the request channel between client and event loop.
    #[validate(range(min = 1, message = "Request channel capacity must be at least 1"))]
    pub request_channel_capacity: usize,

    /// Seconds to wait for the first CONNACK during startup, and for a single
    /// publish to be accepted by the request channel afterwards.
    #[validate(range(min = 1, max = 300, message = "Connect timeout must be between 1 and 300 seconds"))]
    pub connect_timeout: u64,

    /// Initial reconnection delay in seconds.
    #[validate(range(min = 1, message = "Reconnect delay must be at least 1 second"))]
    pub reconnect_delay: u64,

    /// Upper bound for the reconnection delay in seconds.
    #[validate(range(min = 1, message = "Max reconnect delay must be at least 1 second"))]
    pub max_reconnect_delay: u64,

    /// Growth factor applied to the delay after each failed attempt.
    #[validate(range(min = 1.0, max = 30.0, message = "Reconnect multiplier must be between 1 and 30"))]
    pub reconnect_multiplier: f64,

    /// Explicit cap on consecutive reconnection attempts. `None` keeps
    /// retrying at `max_reconnect_delay` for as long as the broker is down.
    pub max_reconnect_attempts: Option<u32>,

    /// TLS settings. Absent or without a CA path means plain TCP.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            topic: None,
            control_topic: None,
            availability_topic: None,
            keep_alive: 60,
            clean_session: true,
            max_inflight: 10,
            request_channel_capacity: 10,
            connect_timeout: 5,
            reconnect_delay: 1,
            max_reconnect_delay: 60,
            reconnect_multiplier: 1.1,
            max_reconnect_attempts: None,
            tls: None,
        }
    }
}

impl Config {
    /// Resolves the three topics for a deployment name, applying overrides.
    pub fn topics(&self, name: &str) -> Topics {
        Topics {
            state: self
                .topic
                .clone()
                .unwrap_or_else(|| format!("{DEFAULT_TOPIC_PREFIX}/{name}")),
            control: self
                .control_topic
                .clone()
                .unwrap_or_else(|| format!("{DEFAULT_TOPIC_PREFIX}/{name}-control")),
            availability: self
                .availability_topic
                .clone()
                .unwrap_or_else(|| format!("{DEFAULT_TOPIC_PREFIX}/{name}-aval")),
        }
    }

    /// Client identifier actually sent to the broker.
    pub fn effective_client_id(&self, name: &str) -> String {
        if self.client_id.is_empty() {
            format!("{name}-pollbee")
        } else {
            self.client_id.clone()
        }
    }

    /// Credentials, when a non-empty username is configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match &self.username {
            Some(user) if !user.is_empty() => {
                Some((user.clone(), self.password.clone().unwrap_or_default()))
            }
            _ => None,
        }
    }

    /// Enabled TLS settings, if any.
    pub fn tls_enabled(&self) -> Option<&TlsConfig> {
        self.tls.as_ref().filter(|tls| tls.is_enabled())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Topics used by one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub state: String,
    pub control: String,
    pub availability: String,
}

/// TLS configuration. Files are checked again when the client is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate (PEM) used to verify the broker.
    #[validate(custom(
        function = "validate_file_path",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    /// Client certificate (PEM) for mutual TLS. Requires `client_key_path`.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    /// Unencrypted client private key (PEM). Requires `client_cert_path`.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// CA-only verification, no client authentication.
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    /// Both client certificate and key are configured.
    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    /// TLS is used as soon as a CA certificate is configured.
    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    /// Cross-field checks `validator` cannot express on single fields.
    pub fn validate_pairing(&self) -> Result<(), ValidationError> {
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ValidationError::new("incomplete_client_auth").with_message(
                "Both client certificate and key must be provided or neither".into(),
            ));
        }
        Ok(())
    }
}

/// Checks that a configured path points to an existing regular file.
fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);
    if !path_obj.is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    Ok(())
}
