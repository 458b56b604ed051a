//! Contracts of the pluggable components.
//!
//! A deployment fixes one sample type `S`, one [`Source<S>`] and any number of
//! [`Sink<S>`]s. The executor owns all of them and calls them from a single
//! task, so methods take `&mut self` and never run concurrently with each
//! other.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::ComponentResult;

/// Anything that can flow from a source to the sinks.
pub trait Sample: Clone + Serialize + Debug + Send + Sync + 'static {}

impl<T> Sample for T where T: Clone + Serialize + Debug + Send + Sync + 'static {}

/// Flat JSON record served by the dashboard.
pub type Entry = Map<String, Value>;

/// Converts a sample to the JSON value sent outside the process.
pub type Converter<S> = fn(&S) -> ComponentResult<Value>;

/// Converts a sample to the flat record stored in dashboard data.
pub type Projector<S> = fn(&S) -> ComponentResult<Entry>;

/// Serializes the sample as is.
pub fn to_json<S: Serialize>(sample: &S) -> ComponentResult<Value> {
    Ok(serde_json::to_value(sample)?)
}

/// An object sample contributes its own fields; anything else becomes
/// `{"value": ..}`.
pub fn project_default<S: Serialize>(sample: &S) -> ComponentResult<Entry> {
    match serde_json::to_value(sample)? {
        Value::Object(map) => Ok(map),
        other => {
            let mut entry = Entry::new();
            entry.insert("value".to_string(), other);
            Ok(entry)
        }
    }
}

/// Produces one sample per tick.
#[async_trait::async_trait]
pub trait Source<S: Sample>: Send {
    /// Derives settings from the deployment name. Called once, at registration.
    fn setup(&mut self, _name: &str) {}

    /// One-time initialization. An error aborts startup.
    async fn init(&mut self, debug: bool) -> ComponentResult<()>;

    /// Exactly one sample or an error.
    async fn produce(&mut self) -> ComponentResult<S>;

    /// Errors are logged, never escalated.
    async fn close(&mut self) -> ComponentResult<()> {
        Ok(())
    }

    /// Short label used in log lines.
    fn kind(&self) -> &'static str;
}

/// Receives every produced sample.
#[async_trait::async_trait]
pub trait Sink<S: Sample>: Send {
    fn setup(&mut self, _name: &str) {}

    async fn init(&mut self, debug: bool) -> ComponentResult<()>;

    /// A failure here never keeps the sample from the other sinks.
    async fn consume(&mut self, sample: &S) -> ComponentResult<()>;

    async fn close(&mut self) -> ComponentResult<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str;
}
