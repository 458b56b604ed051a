//! Logs every message published on a broker until Ctrl-C.
//!
//! ```text
//! cargo run -p pollbee-mqtt --example monitor -- [broker.toml]
//! ```
//!
//! The optional file uses the keys of pollbee's `[mqtt]` section (host, port,
//! client_id, username, password, `[tls]`), without the section header.
//! Without it the monitor connects to `localhost:1883`.

use std::{env, error::Error, fs, time::Duration};

use pollbee_mqtt::{backoff::Backoff, client::ClientBuilder, Config};
use rumqttc::{Event, Packet, QoS};
use tracing::{info, warn};
use validator::Validate;

const NAME: &str = "monitor";

fn load_config() -> Result<Config, Box<dyn Error>> {
    let config = match env::args().nth(1) {
        Some(path) => toml::from_str::<Config>(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = load_config()?;
    let topics = config.topics(NAME);
    let (client, mut event_loop) = ClientBuilder::from_config(&config, NAME, &topics)
        .without_last_will()
        .build()?;
    let mut backoff = Backoff::from_config(&config);

    info!(
        "Monitoring {}:{} as '{}'",
        config.host,
        config.port,
        config.effective_client_id(NAME)
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, disconnecting");
                break;
            }
            event = event_loop.poll() => match event {
                // Clean sessions forget subscriptions, so subscribe on every CONNACK.
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff.reset();
                    client.subscribe("#", QoS::AtMostOnce).await?;
                    info!("Connected, subscribed to '#'");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    info!("[{}] {}", publish.topic, String::from_utf8_lossy(&publish.payload));
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = backoff.next_sleep()?;
                    warn!("Connection error: {}, retrying in {:.1}s", e, delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    client.disconnect().await?;
    let flush = async {
        while let Ok(event) = event_loop.poll().await {
            if matches!(event, Event::Outgoing(rumqttc::Outgoing::Disconnect)) {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(1), flush).await;
    Ok(())
}
