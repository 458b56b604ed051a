//! Broker connection management with automatic reconnection.
//!
//! - `ConnectionKernel` drives the `rumqttc` event loop on its own task,
//!   classifies failures, applies backoff and broadcasts [`ConnectionState`].
//! - `MqttConnection` is the handle the rest of the application holds: it
//!   exposes the client, the state receiver and a graceful shutdown.
//!
//! ```text
//! MqttSink / Publisher
//!     ↓ AsyncClient (request channel)
//! ConnectionKernel (event loop task, backoff, state)
//!     ↓
//! Broker (TCP/TLS)
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, Publish};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    backoff::Backoff,
    client::ClientBuilder,
    config::{Config, Topics},
    error::TransferError,
    state::ConnectionState,
};

/// Called after every accepted CONNACK, including reconnects.
///
/// Runs on the kernel task and must not block: use the `try_*` client methods,
/// e.g. `client.try_subscribe(&topics.control, QoS::AtLeastOnce)`.
pub type OnConnect = fn(&AsyncClient, &Topics);

/// Runs the event loop until cancelled or a fatal error occurs.
pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    topics: Option<Topics>,
    on_connect: Option<OnConnect>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            cancel,
            state_tx,
            topics: None,
            on_connect: None,
        }
    }

    /// Registers a hook fired on every successful (re)connect.
    pub fn with_on_connect(mut self, topics: Topics, hook: OnConnect) -> Self {
        self.topics = Some(topics);
        self.on_connect = Some(hook);
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Broadcasts only real transitions.
    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            info!("MQTT connection state changed to: {}", state);
        }
    }

    /// Main loop.
    ///
    /// - CONNACK success resets the backoff and marks the state `Connected`.
    /// - Transient errors sleep for the next backoff delay (cancellable).
    /// - Fatal errors and backoff exhaustion end the loop with an error.
    /// - Cancellation sends DISCONNECT and ends the loop with `Ok`.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        debug!("Starting MQTT event loop");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested, disconnecting from broker");
                    self.disconnect().await;
                    self.update_state(ConnectionState::Closed);
                    return Ok(());
                }

                event = self.event_loop.poll() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        if is_fatal_error(&e) {
                            error!("Fatal MQTT error, giving up: {}", root_cause(&e));
                            self.update_state(ConnectionState::Disconnected(e.to_string()));
                            return Err(TransferError::from(e));
                        }

                        let delay = match self.backoff.next_sleep() {
                            Ok(delay) => delay,
                            Err(exhausted) => {
                                error!("Maximum MQTT reconnect attempts exceeded: {}", exhausted);
                                self.update_state(ConnectionState::Disconnected(exhausted.to_string()));
                                return Err(exhausted.into());
                            }
                        };

                        warn!(
                            "Reconnecting in {:.2} seconds due to error: {}",
                            delay.as_secs_f64(),
                            root_cause(&e)
                        );
                        self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));

                        tokio::select! {
                            _ = self.cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    self.backoff.reset();
                    self.update_state(ConnectionState::Connected);
                    if let (Some(hook), Some(topics)) = (self.on_connect, &self.topics) {
                        debug!("Running on-connect hook");
                        hook(&self.client, topics);
                    }
                }
            }
            Event::Incoming(Packet::Publish(publish)) => self.handle_publish(&publish),
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected(
                    "Disconnected by broker".into(),
                ));
            }
            Event::Incoming(packet) => trace!("Incoming packet: {:?}", packet),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {:?}", outgoing),
        }
    }

    fn handle_publish(&self, publish: &Publish) {
        let payload = String::from_utf8_lossy(&publish.payload);
        match &self.topics {
            Some(topics) if publish.topic == topics.control => {
                info!("Control message on '{}': {}", publish.topic, payload)
            }
            _ => debug!("Message on '{}': {}", publish.topic, payload),
        }
    }

    /// Best effort: the socket closes either way.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Error sending disconnect packet: {}", e);
            return;
        }
        // Pump the loop so the DISCONNECT actually leaves the request channel.
        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(1), flush).await.is_err() {
            debug!("DISCONNECT was not flushed within 1s");
        }
    }
}

/// Whether retrying a connection error makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Certificates or crypto setup are wrong.
        ConnectionError::Tls(_) => Fatal,
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    classify_connection_error(err) == Disposition::Fatal
}

/// Innermost message of an error chain, without surrounding quotes.
fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

/// Running connection: client handle plus the kernel task.
pub struct MqttConnection {
    client: AsyncClient,
    topics: Topics,
    publish_timeout: Duration,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    kernel: Option<JoinHandle<Result<(), TransferError>>>,
}

impl MqttConnection {
    /// Builds the client and spawns the kernel. Does not wait for CONNACK.
    ///
    /// # Errors
    ///
    /// [`TransferError::ClientSetup`] or [`TransferError::Io`] when the TLS
    /// files cannot be loaded.
    pub fn start(config: &Config, name: &str) -> Result<Self, TransferError> {
        Self::start_with_hook(config, name, None)
    }

    /// Like [`MqttConnection::start`], running `on_connect` after every
    /// accepted CONNACK.
    ///
    /// # Errors
    ///
    /// Same as [`MqttConnection::start`].
    pub fn start_with_hook(
        config: &Config,
        name: &str,
        on_connect: Option<OnConnect>,
    ) -> Result<Self, TransferError> {
        let topics = config.topics(name);
        let (client, event_loop) = ClientBuilder::from_config(config, name, &topics).build()?;
        let cancel = CancellationToken::new();
        let mut kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            Backoff::from_config(config),
            cancel.clone(),
        );
        if let Some(hook) = on_connect {
            kernel = kernel.with_on_connect(topics.clone(), hook);
        }
        let state_rx = kernel.subscribe_state();
        let handle = tokio::spawn(kernel.run());

        Ok(Self {
            client,
            topics,
            publish_timeout: config.connect_timeout(),
            state_rx,
            cancel,
            kernel: Some(handle),
        })
    }

    /// Waits until the broker accepts the connection.
    ///
    /// Returns as soon as the state becomes `Connected`; it does not wait for
    /// the timeout to elapse.
    ///
    /// # Errors
    ///
    /// - [`TransferError::ConnectTimeout`] when no CONNACK arrived in time.
    /// - The kernel's own error (fatal connection error, exhausted attempt
    ///   cap) when it stops before connecting.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut connection = MqttConnection::start(&config, "boiler")?;
    /// connection.wait_connected(config.connect_timeout()).await?;
    /// ```
    pub async fn wait_connected(&mut self, timeout: Duration) -> Result<(), TransferError> {
        let mut rx = self.state_rx.clone();
        // The sender lives in the kernel, so a finished kernel closes the channel.
        let connected = async move {
            rx.wait_for(|s| s.is_connected() || s.is_terminal())
                .await
                .map(|state| state.is_connected())
                .unwrap_or(false)
        };

        match tokio::time::timeout(timeout, connected).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.kernel_failure().await),
            Err(_) => {
                if self.kernel.as_ref().is_some_and(|k| k.is_finished()) {
                    Err(self.kernel_failure().await)
                } else {
                    Err(TransferError::ConnectTimeout(timeout))
                }
            }
        }
    }

    /// Extracts the error the kernel finished with.
    async fn kernel_failure(&mut self) -> TransferError {
        match self.kernel.take() {
            Some(handle) => match handle.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => TransferError::NotRunning,
                Err(join) => TransferError::ClientSetup(format!("Connection kernel panicked: {join}")),
            },
            None => TransferError::NotRunning,
        }
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// False after `shutdown`, and once the kernel stopped on its own.
    pub fn is_running(&self) -> bool {
        self.kernel.as_ref().is_some_and(|k| !k.is_finished())
    }

    /// Disconnects and waits for the kernel task. Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), TransferError> {
        let Some(handle) = self.kernel.take() else {
            debug!("MQTT connection already shut down");
            return Ok(());
        };

        self.cancel.cancel();
        match handle.await {
            Ok(result) => result,
            Err(join) => Err(TransferError::ClientSetup(format!(
                "Connection kernel panicked: {join}"
            ))),
        }
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
