//! Publishes every sample to an MQTT broker.
//!
//! JSON document to `nn/{name}` (QoS 1), then `online` to `nn/{name}-aval`
//! (QoS 0). The broker publishes the retained `offline` last will when the
//! connection drops without a DISCONNECT.
//!
//! The connection kernel reconnects on its own. If it stops anyway (fatal
//! broker error, explicit attempt cap), the next `consume` starts a new one.

use pollbee_mqtt::{Config as MqttConfig, MqttConnection, OnConnect, Publisher};
use tracing::{debug, info, warn};

use crate::core::{
    error::{ComponentError, ComponentResult},
    traits::{to_json, Converter, Sample, Sink},
};

pub struct MqttSink<S> {
    config: MqttConfig,
    name: String,
    converter: Converter<S>,
    on_connect: Option<OnConnect>,
    connection: Option<MqttConnection>,
    publisher: Option<Publisher>,
}

impl<S: Sample> MqttSink<S> {
    pub fn new(config: MqttConfig) -> Self {
        Self::with_converter(config, to_json::<S>)
    }

    pub fn with_converter(config: MqttConfig, converter: Converter<S>) -> Self {
        Self {
            config,
            name: String::new(),
            converter,
            on_connect: None,
            connection: None,
            publisher: None,
        }
    }

    /// Runs `hook` after every successful (re)connect, e.g. to subscribe to
    /// the control topic.
    pub fn with_on_connect(mut self, hook: OnConnect) -> Self {
        self.on_connect = Some(hook);
        self
    }

    fn start_connection(&self) -> ComponentResult<MqttConnection> {
        MqttConnection::start_with_hook(&self.config, &self.name, self.on_connect)
            .map_err(ComponentError::transport)
    }

    fn attach(&mut self, connection: MqttConnection) {
        self.publisher = Some(Publisher::new(
            connection.client().clone(),
            connection.topics().clone(),
            connection.publish_timeout(),
        ));
        self.connection = Some(connection);
    }

    /// Replaces a connection whose kernel has stopped. Does not wait for
    /// CONNACK; publishes queue until the broker accepts the connection.
    async fn restart(&mut self) -> ComponentResult<()> {
        if let Some(mut stale) = self.connection.take() {
            match stale.shutdown().await {
                Ok(()) => warn!("MQTT connection kernel stopped, restarting"),
                Err(e) => warn!("MQTT connection kernel stopped ({}), restarting", e),
            }
        }
        self.publisher = None;
        let connection = self.start_connection()?;
        self.attach(connection);
        Ok(())
    }
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.state().is_connected())
    }
}

#[async_trait::async_trait]
impl<S: Sample> Sink<S> for MqttSink<S> {
    fn setup(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Waits up to `connect_timeout` for the broker to accept the connection.
    async fn init(&mut self, _debug: bool) -> ComponentResult<()> {
        let mut connection = self.start_connection()?;

        let timeout = self.config.connect_timeout();
        info!(
            "Connecting to MQTT broker {}:{} (timeout {:?})",
            self.config.host, self.config.port, timeout
        );
        if let Err(e) = connection.wait_connected(timeout).await {
            if let Err(shutdown) = connection.shutdown().await {
                debug!("MQTT shutdown after failed connect: {}", shutdown);
            }
            return Err(ComponentError::transport(e));
        }

        let topics = connection.topics();
        info!(
            "Connected to MQTT broker, publishing to '{}' (availability '{}')",
            topics.state, topics.availability
        );
        self.attach(connection);
        Ok(())
    }

    async fn consume(&mut self, sample: &S) -> ComponentResult<()> {
        let stopped = self.connection.as_ref().is_some_and(|c| !c.is_running());
        if stopped {
            self.restart().await?;
        }

        let publisher = self
            .publisher
            .as_ref()
            .ok_or(ComponentError::NotInitialized("mqtt sink"))?;
        let payload = (self.converter)(sample)?;
        publisher
            .publish_state(&payload)
            .await
            .map_err(ComponentError::transport)
    }

    /// Sends DISCONNECT and stops the connection kernel. Idempotent.
    async fn close(&mut self) -> ComponentResult<()> {
        self.publisher = None;
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        connection.shutdown().await.map_err(|e| {
            warn!("MQTT connection ended with error: {}", e);
            ComponentError::transport(e)
        })
    }

    fn kind(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn unreachable_config() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".into(),
            port: 9,
            connect_timeout: 1,
            max_reconnect_attempts: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_consume_before_init_fails() {
        let mut sink = MqttSink::<f64>::new(unreachable_config());
        assert!(matches!(
            sink.consume(&1.0).await,
            Err(ComponentError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_init_fails_without_broker() {
        let mut sink = MqttSink::<f64>::new(unreachable_config());
        sink.setup("test");
        let result = tokio::time::timeout(Duration::from_secs(10), sink.init(false))
            .await
            .unwrap();
        assert!(matches!(result, Err(ComponentError::Transport(_))));
        assert!(!sink.is_connected());
    }

    #[tokio::test]
    async fn test_consume_restarts_stopped_kernel() {
        let mut sink = MqttSink::<f64>::new(unreachable_config());
        sink.setup("test");
        let connection = sink.start_connection().unwrap();
        sink.attach(connection);

        let stopped = async {
            while sink.connection.as_ref().is_some_and(|c| c.is_running()) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), stopped)
            .await
            .unwrap();

        assert!(sink.consume(&1.0).await.is_ok());
        assert!(sink.connection.as_ref().is_some_and(|c| c.is_running()));
        let _ = sink.close().await;
        assert!(sink.connection.is_none());
    }

    #[tokio::test]
    async fn test_close_without_init_is_noop() {
        let mut sink = MqttSink::<f64>::new(unreachable_config());
        assert!(sink.close().await.is_ok());
        assert!(sink.close().await.is_ok());
    }
}
