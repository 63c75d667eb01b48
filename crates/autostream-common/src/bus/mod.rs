//! Publish/subscribe transport shared by the control service and agents.
//!
//! Each connection delivers every inbound message to one handler callback,
//! invoked on the transport's own background task with `(topic, payload)`.
//! Two implementations:
//! - [`MqttBus`]: a real broker connection (rumqttc)
//! - [`InMemoryBus`]: broker-less, in-process, for tests and single-process runs

mod memory;
mod mqtt;

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::QoS;
use thiserror::Error;

pub use memory::{InMemoryBus, Subscription};
pub use mqtt::{MqttBus, MqttSettings};

/// Callback receiving every inbound message as `(topic, payload)`.
///
/// Runs on the transport task; keep it short and never block on I/O.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

// ── Delivery ────────────────────────────────────────────────────────

/// Delivery guarantee requested for one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// At most once.
    #[default]
    FireAndForget,
    /// At least once.
    Confirmed,
    /// Exactly once, as far as the transport provides it.
    Exactly,
}

impl From<Delivery> for QoS {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::FireAndForget => QoS::AtMostOnce,
            Delivery::Confirmed => QoS::AtLeastOnce,
            Delivery::Exactly => QoS::ExactlyOnce,
        }
    }
}

// ── Publisher ───────────────────────────────────────────────────────

/// Outbound half of a bus connection.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> Result<(), BusError>;
}

/// MQTT topic filter matching with `+` (one level) and `#` (rest, last only).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
