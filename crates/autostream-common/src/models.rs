//! Data models for the Autostream relay.
//!
//! Stations are addressed by their control endpoint; liveness samples are
//! built fresh by the agent on every health check and never stored.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Station ─────────────────────────────────────────────────────────

/// Identity of a controlled station, conventionally `"{host}:{port}"`.
///
/// Used as the topic-namespacing key on the bus and as the map key
/// wherever a station is addressed. One identity per physical control
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the conventional identity for a control endpoint.
    pub fn from_endpoint(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A station as stored by the directory: where its control socket lives
/// and the secret that unlocks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRecord {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Control-socket secret. Never serialized back out of the API.
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl StationRecord {
    pub fn station_id(&self) -> StationId {
        StationId::from_endpoint(&self.host, self.port)
    }
}

// ── Liveness ────────────────────────────────────────────────────────

/// State of one visual source inside a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(rename = "source")]
    pub source_name: String,
    pub up: bool,
}

/// Per-scene source states, scenes ordered by name, sources in the order
/// the production application lists them.
pub type LivenessSample = BTreeMap<String, Vec<SourceState>>;
