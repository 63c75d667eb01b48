//! Input source liveness sampling.
//!
//! Every interval the sampler walks the scene list, takes a tiny screenshot
//! of each matching input and classifies it by the length of the returned
//! data URI: a source that renders nothing always encodes to the same
//! blank image. Down sources are reported on the liveness topic; a clean
//! sample publishes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use autostream_common::bus::Delivery;
use autostream_common::models::{LivenessSample, SourceState, StationId};
use autostream_common::protocol::LivenessReport;

use crate::obsws::{ControlSession, ControlSocket, SocketError};
use crate::AgentState;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessParams {
    /// Only scene items of this input kind are sampled.
    pub input_kind: String,
    pub image_width: u32,
    pub image_height: u32,
    pub image_format: String,
    /// `imageData` length of a blank screenshot at the above size and format.
    pub blank_fingerprint_len: usize,
    pub interval_secs: u64,
}

impl Default for LivenessParams {
    fn default() -> Self {
        Self {
            input_kind: "gstreamer-source".into(),
            image_width: 8,
            image_height: 8,
            image_format: "png".into(),
            blank_fingerprint_len: 146,
            interval_secs: 60,
        }
    }
}

impl LivenessParams {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// `true` if the screenshot is not the blank fingerprint.
pub fn classify(image_data: &str, params: &LivenessParams) -> bool {
    image_data.len() != params.blank_fingerprint_len
}

/// Down sources per scene; scenes with none are omitted.
pub fn failures(sample: &LivenessSample) -> BTreeMap<String, Vec<String>> {
    sample
        .iter()
        .filter_map(|(scene, sources)| {
            let down: Vec<String> = sources
                .iter()
                .filter(|s| !s.up)
                .map(|s| s.source_name.clone())
                .collect();
            (!down.is_empty()).then(|| (scene.clone(), down))
        })
        .collect()
}

/// Walk every scene on an open session.
///
/// A scene whose item list cannot be read appears with no sources; a
/// source whose screenshot fails is left out. Only a failed scene list
/// fails the whole sample.
pub async fn sample(
    session: &mut dyn ControlSession,
    params: &LivenessParams,
) -> Result<LivenessSample, SocketError> {
    let scenes = session.request("GetSceneList", None).await?.unwrap_or_default();
    let scene_names: Vec<String> = scenes["scenes"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|scene| scene["sceneName"].as_str().map(str::to_string))
        .collect();

    let mut result = LivenessSample::new();
    for scene in scene_names {
        let items = match session
            .request("GetSceneItemList", Some(json!({ "sceneName": scene })))
            .await
        {
            Ok(items) => items.unwrap_or_default(),
            Err(e) => {
                tracing::debug!(scene = %scene, error = %e, "scene items unavailable");
                result.insert(scene, Vec::new());
                continue;
            }
        };

        let mut states = Vec::new();
        for source in matching_sources(&items, &params.input_kind) {
            let screenshot = session
                .request(
                    "GetSourceScreenshot",
                    Some(json!({
                        "sourceName": source,
                        "imageWidth": params.image_width,
                        "imageHeight": params.image_height,
                        "imageFormat": params.image_format,
                    })),
                )
                .await;
            match screenshot {
                Ok(Some(data)) => {
                    let image = data["imageData"].as_str().unwrap_or_default();
                    states.push(SourceState {
                        up: classify(image, params),
                        source_name: source,
                    });
                }
                Ok(None) => tracing::debug!(source = %source, "empty screenshot response"),
                Err(e) => tracing::debug!(source = %source, error = %e, "screenshot failed"),
            }
        }
        result.insert(scene, states);
    }
    Ok(result)
}

fn matching_sources(items: &Value, input_kind: &str) -> Vec<String> {
    items["sceneItems"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|item| item["inputKind"].as_str() == Some(input_kind))
        .filter_map(|item| item["sourceName"].as_str().map(str::to_string))
        .collect()
}

/// One full check: sample, then build the report if anything is down.
pub async fn check(
    socket: &dyn ControlSocket,
    password: &str,
    station: &StationId,
    params: &LivenessParams,
) -> Result<Option<LivenessReport>, SocketError> {
    let mut session = socket.open(password).await?;
    let sampled = sample(session.as_mut(), params).await;
    session.close().await;

    let fails = failures(&sampled?);
    Ok((!fails.is_empty()).then(|| LivenessReport {
        obs_name: station.clone(),
        fails,
    }))
}

/// Sample every `interval_secs` until shutdown.
pub async fn run(state: Arc<AgentState>) {
    let mut interval = tokio::time::interval(state.liveness.interval());
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let checked = tokio::time::timeout(
            state.liveness.interval(),
            check(state.socket.as_ref(), &state.obs_password, &state.station, &state.liveness),
        )
        .await;
        let report = match checked {
            Ok(Ok(Some(report))) => report,
            Ok(Ok(None)) => {
                tracing::trace!("all sources up");
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "liveness check failed");
                continue;
            }
            Err(_) => {
                tracing::warn!("liveness check overran its interval");
                continue;
            }
        };

        tracing::info!(scenes = report.fails.len(), "sources down");
        let body = match serde_json::to_vec(&report) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize liveness report");
                continue;
            }
        };
        if let Err(e) = state
            .bus
            .publish(&state.topics.liveness, body, Delivery::FireAndForget)
            .await
        {
            tracing::warn!(error = %e, "failed to publish liveness report");
        }
    }
}
