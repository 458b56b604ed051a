//! Built-in sinks. The in-memory cache is a sink too, see [`crate::core::cache`].

pub mod console;
#[cfg(feature = "http-dashboard")]
pub mod http;
#[cfg(feature = "pollbee-mqtt")]
pub mod mqtt;

pub use console::ConsoleSink;
#[cfg(feature = "http-dashboard")]
pub use http::DashboardSink;
#[cfg(feature = "pollbee-mqtt")]
pub use mqtt::MqttSink;
