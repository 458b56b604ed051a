//! MQTT transport for pollbee.
//!
//! Publishes samples as JSON to a state topic and keeps an availability topic
//! (`online` on every publish, retained `offline` last will). The connection
//! kernel reconnects with exponential backoff and stops on errors that
//! retrying cannot fix.
//!
//! ```ignore
//! let mut connection = MqttConnection::start(&config, "boiler")?;
//! connection.wait_connected(config.connect_timeout()).await?;
//!
//! let publisher = Publisher::new(
//!     connection.client().clone(),
//!     connection.topics().clone(),
//!     connection.publish_timeout(),
//! );
//! publisher.publish_state(&sample).await?;
//!
//! connection.shutdown().await?;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod publisher;
pub mod state;

pub use client::{OFFLINE, ONLINE};
pub use config::{Config, TlsConfig, Topics};
pub use connection::{MqttConnection, OnConnect};
pub use error::TransferError;
pub use publisher::Publisher;
pub use state::ConnectionState;
