//! Inbound bus traffic for the control service.
//!
//! - `{responses}/{station}` → correlation register
//! - `{liveness}` → latest failure report per station
//! - `{state}` → latest heartbeat per station
//!
//! Runs on the transport's task, so every branch is a map update.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use autostream_common::bus::MessageHandler;
use autostream_common::models::StationId;
use autostream_common::protocol::{LivenessReport, ResponseEnvelope, StationHeartbeat, Topics};

use crate::correlation::CorrelationRegister;

/// Latest health signals reported by each station.
#[derive(Clone, Default)]
pub struct StationHealth {
    inner: Arc<HealthInner>,
}

#[derive(Default)]
struct HealthInner {
    heartbeats: DashMap<StationId, StationHeartbeat>,
    liveness: DashMap<StationId, LivenessReport>,
}

/// What `/health` shows for one station.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub heartbeat: Option<StationHeartbeat>,
    pub liveness: Option<LivenessReport>,
}

impl StationHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_heartbeat(&self, heartbeat: StationHeartbeat) {
        self.inner.heartbeats.insert(heartbeat.name.clone(), heartbeat);
    }

    pub fn record_liveness(&self, report: LivenessReport) {
        self.inner.liveness.insert(report.obs_name.clone(), report);
    }

    pub fn snapshot(&self, station: &StationId) -> HealthSnapshot {
        HealthSnapshot {
            heartbeat: self.inner.heartbeats.get(station).map(|h| h.value().clone()),
            liveness: self.inner.liveness.get(station).map(|l| l.value().clone()),
        }
    }
}

/// Filters the control service subscribes to.
pub fn subscriptions(topics: &Topics) -> Vec<String> {
    vec![
        topics.responses_filter(),
        topics.liveness.clone(),
        topics.state.clone(),
    ]
}

/// Build the callback handed to the bus transport.
pub fn handler(topics: Topics, register: CorrelationRegister, health: StationHealth) -> MessageHandler {
    Arc::new(move |topic: &str, payload: &[u8]| {
        dispatch(&topics, &register, &health, topic, payload);
    })
}

fn dispatch(
    topics: &Topics,
    register: &CorrelationRegister,
    health: &StationHealth,
    topic: &str,
    payload: &[u8],
) {
    if let Some(station) = topics.station_from_response(topic) {
        match ResponseEnvelope::from_slice(payload) {
            Ok(envelope) => {
                register.on_message(&station, envelope);
            }
            Err(e) => tracing::warn!(station = %station, error = %e, "unparseable response dropped"),
        }
    } else if topic == topics.liveness {
        match serde_json::from_slice::<LivenessReport>(payload) {
            Ok(report) => {
                let down: usize = report.fails.values().map(Vec::len).sum();
                tracing::warn!(station = %report.obs_name, down, "station reported failing sources");
                health.record_liveness(report);
            }
            Err(e) => tracing::warn!(error = %e, "unparseable liveness report dropped"),
        }
    } else if topic == topics.state {
        match serde_json::from_slice::<StationHeartbeat>(payload) {
            Ok(heartbeat) => {
                tracing::trace!(station = %heartbeat.name, state = heartbeat.state, "heartbeat");
                health.record_heartbeat(heartbeat);
            }
            Err(e) => tracing::warn!(error = %e, "unparseable heartbeat dropped"),
        }
    } else {
        tracing::debug!(topic, "message on unexpected topic ignored");
    }
}
