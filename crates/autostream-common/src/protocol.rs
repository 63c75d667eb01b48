//! Bus messages exchanged between the control service and station agents.
//!
//! All messages are UTF-8 JSON. Requests travel on `{requests}/{station}`,
//! responses on `{responses}/{station}`; liveness reports and heartbeats go
//! to flat topics shared by every station.

use std::collections::BTreeMap;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::StationId;

/// Error text carried by a locally synthesized response when no answer
/// arrived within the caller's bound.
pub const TIME_LIMIT_EXCEEDED: &str = "time limit exceeded";

/// Timestamp layout used in heartbeats.
pub const HEARTBEAT_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

// ── Envelopes ───────────────────────────────────────────────────────

/// A command bound for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Command name understood by the station's control socket (e.g. `GetVersion`).
    pub request: String,
    /// Command arguments, `null` when the command takes none.
    #[serde(default)]
    pub data: Option<Value>,
    /// Secret that unlocks the station's control socket.
    #[serde(rename = "password")]
    pub credential: String,
    /// Correlation id, present only when the control service runs in
    /// concurrent dispatch mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestEnvelope {
    pub fn new(request: impl Into<String>, data: Option<Value>, credential: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            data,
            credential: credential.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// The outcome of one command. When `error` is set, `data` carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ResponseEnvelope {
    /// A successful result.
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            data,
            error: None,
            request_id: None,
        }
    }

    /// A failed result with a human-readable reason.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            request_id: None,
        }
    }

    /// The response a caller sees when the station never answered.
    pub fn timeout() -> Self {
        Self::err(TIME_LIMIT_EXCEEDED)
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIME_LIMIT_EXCEEDED)
    }

    /// Split into the data payload or the error text. `data` is never
    /// looked at when `error` is set.
    pub fn into_result(self) -> Result<Option<Value>, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

// ── Station → Control ───────────────────────────────────────────────

/// Sources found down during one liveness check, grouped by scene.
/// Published only when at least one source is down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessReport {
    pub obs_name: StationId,
    pub fails: BTreeMap<String, Vec<String>>,
}

/// Periodic "still here" message from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationHeartbeat {
    pub name: StationId,
    /// Local wall-clock time formatted with [`HEARTBEAT_TIME_FORMAT`].
    pub time: String,
    /// Whether the station's control socket answered.
    pub state: bool,
}

impl StationHeartbeat {
    /// A heartbeat stamped with the current local time.
    pub fn now(name: StationId, state: bool) -> Self {
        Self {
            name,
            time: Local::now().format(HEARTBEAT_TIME_FORMAT).to_string(),
            state,
        }
    }
}

// ── Topics ──────────────────────────────────────────────────────────

/// Topic prefixes shared by both ends of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub requests: String,
    pub responses: String,
    pub liveness: String,
    pub state: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            requests: "requests".into(),
            responses: "responses".into(),
            liveness: "liveness".into(),
            state: "state".into(),
        }
    }
}

impl Topics {
    /// `{requests}/{station}`
    pub fn request_topic(&self, station: &StationId) -> String {
        format!("{}/{}", self.requests, station)
    }

    /// `{responses}/{station}`
    pub fn response_topic(&self, station: &StationId) -> String {
        format!("{}/{}", self.responses, station)
    }

    /// Filter matching every station's response topic.
    pub fn responses_filter(&self) -> String {
        format!("{}/#", self.responses)
    }

    /// Recover the station from a topic under the response prefix.
    pub fn station_from_response(&self, topic: &str) -> Option<StationId> {
        station_under(&self.responses, topic)
    }
}

fn station_under(prefix: &str, topic: &str) -> Option<StationId> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    Some(StationId::from(rest))
}
