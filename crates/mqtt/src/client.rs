//! Builds the `rumqttc` client and event loop from a [`Config`].
//!
//! The builder applies keep-alive, session, inflight and credential settings,
//! registers the `offline` last will on the availability topic and switches
//! the transport to TLS when a CA certificate is configured.

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, TlsConfiguration, Transport};

use super::{
    config::{Config, TlsConfig, Topics},
    error::TransferError,
};

/// Payload of the availability topic while the client is alive.
pub const ONLINE: &str = "online";

/// Payload the broker publishes on our behalf when the client vanishes.
pub const OFFLINE: &str = "offline";

pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
    tls_config: Option<TlsConfig>,
    last_will: Option<LastWill>,
}

impl ClientBuilder {
    /// Prepares options for the given deployment name.
    pub fn from_config(config: &Config, name: &str, topics: &Topics) -> Self {
        let mut opts = MqttOptions::new(
            config.effective_client_id(name),
            config.host.clone(),
            config.port,
        );
        opts.set_keep_alive(Duration::from_secs(config.keep_alive));
        opts.set_clean_session(config.clean_session);
        opts.set_inflight(config.max_inflight);

        if let Some((user, password)) = config.credentials() {
            opts.set_credentials(user, password);
        }

        let last_will = LastWill::new(
            topics.availability.clone(),
            OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );

        Self {
            opts,
            cap: config.request_channel_capacity,
            tls_config: config.tls_enabled().cloned(),
            last_will: Some(last_will),
        }
    }

    /// Drops the `offline` last will, for clients that only observe.
    pub fn without_last_will(mut self) -> Self {
        self.last_will = None;
        self
    }

    pub fn options(&self) -> &MqttOptions {
        &self.opts
    }

    pub fn last_will(&self) -> Option<&LastWill> {
        self.last_will.as_ref()
    }

    /// Loads certificates and assembles the TLS transport.
    fn build_tls_transport(tls: &TlsConfig) -> Result<Transport, TransferError> {
        tls.validate_pairing()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let ca_path = tls
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("TLS configuration is not set".into()))?;
        let ca = fs::read(ca_path)?;

        let client_auth = match (&tls.client_cert_path, &tls.client_key_path) {
            (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }))
    }

    /// Consumes the builder. No network traffic happens until the event loop
    /// is polled.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(will) = self.last_will {
            opts.set_last_will(will);
        }
        if let Some(tls) = &self.tls_config {
            opts.set_transport(Self::build_tls_transport(tls)?);
        }
        Ok(AsyncClient::new(opts, self.cap))
    }
}
