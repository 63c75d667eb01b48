//! Send one command to one station and wait for its answer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use autostream_common::auth::CredentialError;
use autostream_common::bus::{Bus, BusError, Delivery};
use autostream_common::models::StationId;
use autostream_common::protocol::{RequestEnvelope, ResponseEnvelope, Topics};

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::correlation::CorrelationRegister;

/// Failures that happen on this side of the bus. A station that answered
/// with an error, or never answered, is not a `RelayError`: it comes back
/// as a [`ResponseEnvelope`] with `error` set.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("bus transport failed: {0}")]
    Transport(#[from] BusError),
    #[error("cannot encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[derive(Clone)]
pub struct Invoker {
    bus: Arc<dyn Bus>,
    register: CorrelationRegister,
    topics: Topics,
    timeout: Duration,
}

impl Invoker {
    pub fn new(bus: Arc<dyn Bus>, register: CorrelationRegister, topics: Topics) -> Self {
        Self {
            bus,
            register,
            topics,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(&self) -> &CorrelationRegister {
        &self.register
    }

    /// Publish `command` to `station` and wait for the correlated response.
    ///
    /// A station that does not answer within the configured bound yields
    /// `Ok` with the "time limit exceeded" envelope.
    pub async fn invoke(
        &self,
        station: &StationId,
        command: &str,
        data: Option<Value>,
        credential: &str,
    ) -> Result<ResponseEnvelope, RelayError> {
        let mut ticket = self.register.begin(station).await;

        let request = RequestEnvelope::new(command, data, credential)
            .with_request_id(ticket.request_id().map(str::to_string));
        let payload = request.to_bytes()?;
        let topic = self.topics.request_topic(station);

        if let Err(e) = self.bus.publish(&topic, payload, Delivery::Confirmed).await {
            tracing::warn!(station = %station, command, error = %e, "request publish failed");
            self.register.end(ticket);
            return Err(e.into());
        }
        tracing::debug!(station = %station, command, request_id = ?ticket.request_id(), "request published");

        let response = self.register.await_result(&mut ticket, self.timeout).await;
        self.register.end(ticket);

        if let Some(error) = &response.error {
            tracing::info!(station = %station, command, error = %error, "station reported error");
        }
        Ok(response)
    }
}
