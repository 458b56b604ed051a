//! Publishing of samples and availability.
//!
//! Every publish is a pair: the JSON document on the state topic (QoS 1, not
//! retained), then `online` on the availability topic (QoS 0). Both only
//! enqueue into the request channel; delivery is the event loop's business.

use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::debug;

use super::{client::ONLINE, config::Topics, error::TransferError};

#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    topics: Topics,
    timeout: Duration,
}

impl Publisher {
    pub fn new(client: AsyncClient, topics: Topics, timeout: Duration) -> Self {
        Self {
            client,
            topics,
            timeout,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publishes a sample and refreshes the availability topic.
    ///
    /// # Errors
    ///
    /// - [`TransferError::Serialization`] when the sample is not valid JSON.
    /// - [`TransferError::PublishTimeout`] when the request channel stays full.
    /// - [`TransferError::ClientTransfer`] when the connection kernel is gone.
    pub async fn publish_state<T: Serialize + ?Sized>(&self, sample: &T) -> Result<(), TransferError> {
        let payload = serde_json::to_vec(sample)?;
        debug!(
            "Publishing {} bytes to '{}'",
            payload.len(),
            self.topics.state
        );

        self.enqueue(&self.topics.state, QoS::AtLeastOnce, payload)
            .await?;
        self.enqueue(
            &self.topics.availability,
            QoS::AtMostOnce,
            ONLINE.as_bytes().to_vec(),
        )
        .await
    }

    /// A full request channel means the broker is unreachable for longer than
    /// the channel can buffer; give up after `timeout` instead of blocking.
    async fn enqueue(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransferError> {
        match tokio::time::timeout(self.timeout, self.client.publish(topic, qos, false, payload))
            .await
        {
            Ok(result) => result.map_err(TransferError::from),
            Err(_) => Err(TransferError::PublishTimeout(self.timeout)),
        }
    }
}
