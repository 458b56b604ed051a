//! Error type shared by every operation of the MQTT transport.
//!
//! Variants fall into three groups:
//!
//! **Setup** (caught at startup): `ClientSetup`, `ConfigError`, `Io`.
//!
//! **Payload**: `Serialization`.
//!
//! **Runtime**: `ClientTransfer`, `ClientConnection`, `RetriesPolicy`,
//! `ConnectTimeout`, `PublishTimeout`, `NotRunning`.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the MQTT transport.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Sample could not be encoded as a JSON payload.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Client could not be built from the configuration (TLS files, options).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Configuration rejected by `validator`.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request channel to the event loop refused a publish or disconnect.
    ///
    /// Usually means the connection kernel has already stopped.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Broker connection failed in a way that retrying cannot fix.
    ///
    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// Reconnection backoff gave up.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::BackoffError),

    /// No CONNACK arrived within the configured connect timeout.
    #[error("Broker did not accept the connection within {0:?}")]
    ConnectTimeout(Duration),

    /// The request channel stayed full for the whole publish timeout.
    ///
    /// The broker has been unreachable for longer than the channel can buffer.
    #[error("Publish was not accepted by the request channel within {0:?}")]
    PublishTimeout(Duration),

    /// Operation requires a running connection kernel.
    #[error("Connection kernel is not running")]
    NotRunning,

    /// Reading certificate files failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Serialization(err.to_string())
    }
}
