//! MQTT sink: publishes decoded records as retained JSON messages.

use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, warn};

use crate::config::MqttConfig;
use crate::decoders::{HardwareInfoResponse, StatusResponse};
use crate::poll::{AsyncSink, Event, InverterMeta};

/// Publishes one retained JSON message per record under
/// `{topic}/{inverter}/status`, `{topic}/{inverter}/info`, and
/// `{topic}/event`.
///
/// The network event loop is driven by a background task spawned at
/// construction; publishes only enqueue onto `AsyncClient`'s internal
/// channel, so `store_status`/`store_info` never block on the broker.
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    /// Connect to the configured broker and spawn its event loop.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new("hoymiles-dtu", config.host.clone(), config.port);
        options.set_keep_alive(std::time::Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => debug!(?event, "mqtt event"),
                    Err(e) => {
                        warn!(error = %e, "mqtt connection error, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        });

        MqttSink { client, topic: config.topic.clone() }
    }

    async fn publish(&self, subtopic: &str, payload: Vec<u8>) {
        let topic = format!("{}/{subtopic}", self.topic);
        if let Err(e) = self.client.publish(&topic, QoS::AtLeastOnce, true, payload).await {
            warn!(error = %e, %topic, "mqtt publish failed");
        }
    }
}

#[async_trait::async_trait]
impl AsyncSink for MqttSink {
    async fn store_status(&mut self, status: &StatusResponse, meta: &InverterMeta) {
        match serde_json::to_vec(status) {
            Ok(body) => self.publish(&format!("{}/status", meta.serial), body).await,
            Err(e) => warn!(error = %e, "failed to serialize status"),
        }
    }

    async fn store_info(&mut self, info: &HardwareInfoResponse, meta: &InverterMeta) {
        match serde_json::to_vec(info) {
            Ok(body) => self.publish(&format!("{}/info", meta.serial), body).await,
            Err(e) => warn!(error = %e, "failed to serialize hardware info"),
        }
    }

    async fn on_event(&mut self, event: &Event) {
        let body = format!("{event:?}").into_bytes();
        self.publish("event", body).await;
    }
}
