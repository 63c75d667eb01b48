//! MQTT broker connection.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{Bus, BusError, Delivery, MessageHandler};
use crate::ids;

/// Requests queued between the client handle and the event loop.
const CLIENT_CHANNEL_CAPACITY: usize = 64;
/// Floor applied to the configured keep-alive.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);
/// Default packet ceiling in both directions. Scene lists and screenshots
/// from a large production outgrow rumqttc's 10 KiB default.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Broker connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Largest packet accepted or sent, in bytes.
    pub max_packet_size: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: ids::client_id("autostream"),
            keep_alive_secs: 60,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs).max(MIN_KEEP_ALIVE));
        options.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// A live broker session with one subscription and one handler.
pub struct MqttBus {
    client: AsyncClient,
    pump: JoinHandle<()>,
}

impl MqttBus {
    /// Connect, subscribe to every filter and start delivering to `handler`.
    ///
    /// Returns once the broker has acknowledged the connection. An
    /// unreachable broker or rejected credentials fail with
    /// [`BusError::Connection`]; retrying is the caller's decision.
    pub async fn connect(
        settings: &MqttSettings,
        filters: &[String],
        handler: MessageHandler,
    ) -> Result<Self, BusError> {
        let (client, mut eventloop) = AsyncClient::new(settings.options(), CLIENT_CHANNEL_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BusError::Connection(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    break;
                }
                Ok(_) => continue,
                Err(e) => return Err(BusError::Connection(e.to_string())),
            }
        }

        for filter in filters {
            client
                .subscribe(filter, QoS::ExactlyOnce)
                .await
                .map_err(|e| BusError::Connection(format!("subscribe to {filter} failed: {e}")))?;
        }

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            ?filters,
            "connected to MQTT broker"
        );

        let pump = tokio::spawn(pump(eventloop, client.clone(), filters.to_vec(), handler));
        Ok(Self { client, pump })
    }

    /// Send DISCONNECT and stop the background task.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect failed");
        }
        self.pump.abort();
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> Result<(), BusError> {
        self.client
            .publish(topic, delivery.into(), false, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Drive the event loop for the life of the session.
///
/// rumqttc reconnects on the next poll after an error; the session is
/// clean, so the subscriptions are re-issued on every fresh CONNACK.
async fn pump(mut eventloop: EventLoop, client: AsyncClient, filters: Vec<String>, handler: MessageHandler) {
    let mut backoff = Duration::from_secs(1);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handler(publish.topic.as_str(), &publish.payload[..]);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                backoff = Duration::from_secs(1);
                tracing::info!(code = ?ack.code, ?filters, "MQTT session re-established, resubscribing");
                for filter in &filters {
                    if let Err(e) = client.try_subscribe(filter.clone(), QoS::ExactlyOnce) {
                        tracing::warn!(error = %e, filter = %filter, "resubscribe failed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "MQTT connection lost, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
            }
        }
    }
}
