//! Broker connection for the agent.
//!
//! The bus adapter reports a failed first connect and leaves retrying to
//! the caller; the agent keeps trying with exponential backoff until the
//! broker accepts it. Reconnects after that are handled inside the adapter.

use std::time::Duration;

use autostream_common::bus::{BusError, MessageHandler, MqttBus, MqttSettings};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connect to the broker, retrying forever.
pub async fn connect(settings: &MqttSettings, filters: &[String], handler: MessageHandler) -> MqttBus {
    let mut backoff = Backoff::new(INITIAL_BACKOFF, MAX_BACKOFF);

    loop {
        tracing::info!(host = %settings.host, port = settings.port, "connecting to MQTT broker");

        match MqttBus::connect(settings, filters, handler.clone()).await {
            Ok(bus) => return bus,
            Err(e) => log_failure(&e),
        }

        let delay = backoff.next_delay();
        tracing::info!(backoff_s = delay.as_secs(), "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

fn log_failure(err: &BusError) {
    tracing::warn!(error = %err, "MQTT connection failed");
}

/// Doubling delay with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { current: initial, max }
    }

    /// The delay to sleep now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}
