use fleetrelay_core::config::MqttConfig;
use fleetrelay_core::metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::topic::{parse_topic, subscription_filters, TopicKind};
use crate::signals::DeviceSignals;
use crate::{IngestError, Result};

/// Bridge connection to the device broker, using the privileged bridge identity
pub struct MqttSubscriber {
    config: MqttConfig,
    signals: Arc<DeviceSignals>,
}

impl MqttSubscriber {
    pub fn new(config: MqttConfig, signals: Arc<DeviceSignals>) -> Self {
        Self { config, signals }
    }

    /// Keep a session open until cancelled, reconnecting after any failure
    #[instrument(name = "mqtt_subscriber", skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn run(self, cancel: CancellationToken) {
        info!("starting MQTT subscriber");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_connection(&cancel).await {
                Ok(()) => {
                    debug!("MQTT subscriber stopped cleanly");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(self.config.reconnect_delay_seconds)) => {}
                    }
                }
            }
        }

        info!("MQTT subscriber stopped");
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));
        options.set_clean_session(true);
        options.set_credentials(&self.config.bridge_username, &self.config.bridge_password);
        options
    }

    async fn run_connection(&self, cancel: &CancellationToken) -> Result<()> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 100);

        for filter in subscription_filters() {
            client.subscribe(&filter, QoS::AtLeastOnce).await?;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("shutdown signal received");
                    if let Err(e) = client.disconnect().await {
                        warn!(error = %e, "MQTT disconnect failed");
                    }
                    return Ok(());
                }
                event = eventloop.poll() => match event? {
                    Event::Incoming(Packet::Publish(publish)) => {
                        handle_mqtt_message(&self.signals, &publish.topic, &publish.payload).await;
                    }
                    Event::Incoming(Packet::ConnAck(_)) => {
                        info!("connected to MQTT broker");
                    }
                    Event::Incoming(Packet::SubAck(_)) => {
                        debug!("subscription acknowledged");
                    }
                    _ => {}
                },
            }
        }
    }
}

/// Route one broker message to the matching device signal.
/// Malformed topics and payloads are logged and dropped.
pub async fn handle_mqtt_message(signals: &DeviceSignals, topic: &str, payload: &[u8]) {
    match dispatch(signals, topic, payload).await {
        Ok(()) => {
            metrics::adapters::EVENTS_TOTAL
                .with_label_values(&["mqtt", "relayed"])
                .inc();
        }
        Err(e) => {
            metrics::adapters::EVENTS_TOTAL
                .with_label_values(&["mqtt", "error"])
                .inc();
            warn!(topic, error = %e, "Dropping MQTT message");
        }
    }
}

async fn dispatch(signals: &DeviceSignals, topic: &str, payload: &[u8]) -> Result<()> {
    let parsed = parse_topic(topic)?;

    match parsed.kind {
        TopicKind::Status => {
            let text = String::from_utf8_lossy(payload);
            let online = text.trim().trim_matches('"') == "online";
            signals.status(&parsed.device_id, online).await;
        }
        TopicKind::Telemetry => {
            let telemetry = json_object(payload)?;
            signals.telemetry(&parsed.device_id, telemetry).await;
        }
        TopicKind::SmsNew => {
            let message = json_object(payload)?;
            signals.message(&parsed.device_id, message);
        }
    }
    Ok(())
}

fn json_object(payload: &[u8]) -> Result<JsonValue> {
    let value: JsonValue = serde_json::from_slice(payload)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(IngestError::InvalidPayload("expected a JSON object".to_string()))
    }
}
