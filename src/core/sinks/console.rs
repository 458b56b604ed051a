use tracing::info;

use crate::core::{
    error::ComponentResult,
    traits::{to_json, Converter, Sample, Sink},
};

/// Logs every sample at INFO.
pub struct ConsoleSink<S> {
    name: String,
    converter: Converter<S>,
}

impl<S: Sample> ConsoleSink<S> {
    pub fn new() -> Self {
        Self::with_converter(to_json::<S>)
    }

    pub fn with_converter(converter: Converter<S>) -> Self {
        Self {
            name: String::new(),
            converter,
        }
    }
}

impl<S: Sample> Default for ConsoleSink<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<S: Sample> Sink<S> for ConsoleSink<S> {
    fn setup(&mut self, name: &str) {
        self.name = name.to_string();
    }

    async fn init(&mut self, _debug: bool) -> ComponentResult<()> {
        Ok(())
    }

    async fn consume(&mut self, sample: &S) -> ComponentResult<()> {
        let value = (self.converter)(sample)?;
        info!("{}: {}", self.name, value);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "console"
    }
}
