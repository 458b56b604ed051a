//! pollbee: poll a value at a fixed interval and publish it.
//!
//! A single [`core::executor::Executor`] asks one source for a sample per
//! interval and hands it to every registered sink. Consecutive failures are
//! counted against a budget; exhausting it stops the process with a non-zero
//! status. OS signals request a clean stop that must finish within a grace
//! period.
//!
//! ## Modules
//!
//! * `config`: TOML configuration, validated with the `validator` crate.
//! * `core`: executor, lifecycle, time-windowed cache, source and sink
//!   contracts and the built-in implementations.
//! * `logger`: `tracing` subscriber setup (console and journald).
//! * `signals`: shutdown and diagnostics signal routing.
//!
//! ## Features
//!
//! * `pollbee-mqtt`: MQTT sink built on the `pollbee_mqtt` crate (default).
//! * `http-dashboard`: HTTP dashboard sink built on `axum` and `tera` (default).

pub mod config;
pub mod core;
pub mod logger;
pub mod signals;
