//! Typed station commands on top of the raw invoker.
//!
//! Each `decode_*` function is a pure view over a [`ResponseEnvelope`]:
//! when `error` is set it is returned unchanged as [`CommandError::Remote`]
//! and `data` is never inspected.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use autostream_common::models::StationId;
use autostream_common::protocol::ResponseEnvelope;

use crate::invoker::{Invoker, RelayError};

/// Ingest server used when a stream start does not name one.
pub const DEFAULT_STREAM_SERVER: &str = "rtmp://a.rtmp.youtube.com/live2";
const STREAM_SERVICE: &str = "YouTube - RTMPS";
const STREAM_SERVICE_TYPE: &str = "rtmp_common";

#[derive(Debug, Error)]
pub enum CommandError {
    /// The station answered with an error, or never answered.
    #[error("{0}")]
    Remote(String),
    #[error("unexpected {command} response: {reason}")]
    Malformed { command: &'static str, reason: String },
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Remote(msg) if msg == autostream_common::protocol::TIME_LIMIT_EXCEEDED)
    }
}

// ── Decoded results ─────────────────────────────────────────────────

/// Answer to the liveness ping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "obsVersion", default, skip_serializing_if = "Option::is_none")]
    pub obs_version: Option<String>,
    #[serde(rename = "obsWebSocketVersion", default, skip_serializing_if = "Option::is_none")]
    pub websocket_version: Option<String>,
}

/// State of the stream or the recording output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputStatus {
    pub active: bool,
    /// Elapsed output time as `HH:MM:SS.mmm`.
    pub timecode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneList {
    pub current: String,
    pub all: Vec<String>,
}

impl SceneList {
    pub fn contains(&self, scene: &str) -> bool {
        self.all.iter().any(|s| s == scene)
    }
}

// ── Decoders ────────────────────────────────────────────────────────

fn payload(envelope: ResponseEnvelope) -> Result<Option<Value>, CommandError> {
    envelope.into_result().map_err(CommandError::Remote)
}

pub fn decode_version(envelope: ResponseEnvelope) -> Result<Version, CommandError> {
    match payload(envelope)? {
        None => Ok(Version::default()),
        Some(data) => serde_json::from_value(data).map_err(|e| CommandError::Malformed {
            command: "GetVersion",
            reason: e.to_string(),
        }),
    }
}

/// Decode `GetStreamStatus` or `GetRecordStatus`.
pub fn decode_output_status(envelope: ResponseEnvelope) -> Result<OutputStatus, CommandError> {
    let malformed = |reason: &str| CommandError::Malformed {
        command: "output status",
        reason: reason.to_string(),
    };
    let data = payload(envelope)?.ok_or_else(|| malformed("no data"))?;
    let active = data
        .get("outputActive")
        .and_then(Value::as_bool)
        .ok_or_else(|| malformed("missing outputActive"))?;
    let timecode = data
        .get("outputTimecode")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(OutputStatus { active, timecode })
}

pub fn decode_scene_list(envelope: ResponseEnvelope) -> Result<SceneList, CommandError> {
    let malformed = |reason: &str| CommandError::Malformed {
        command: "GetSceneList",
        reason: reason.to_string(),
    };
    let data = payload(envelope)?.ok_or_else(|| malformed("no data"))?;
    let current = data
        .get("currentProgramSceneName")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing currentProgramSceneName"))?
        .to_string();
    let all = data
        .get("scenes")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing scenes"))?
        .iter()
        .filter_map(|scene| scene.get("sceneName").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    Ok(SceneList { current, all })
}

/// Decode any command whose only result is success.
pub fn decode_ack(envelope: ResponseEnvelope) -> Result<(), CommandError> {
    payload(envelope).map(|_| ())
}

// ── Station client ──────────────────────────────────────────────────

/// Typed operations against one station.
#[derive(Clone)]
pub struct StationClient {
    invoker: Invoker,
    station: StationId,
    credential: String,
}

impl StationClient {
    pub fn new(invoker: Invoker, station: StationId, credential: String) -> Self {
        Self {
            invoker,
            station,
            credential,
        }
    }

    async fn call(&self, command: &str, data: Option<Value>) -> Result<ResponseEnvelope, CommandError> {
        Ok(self
            .invoker
            .invoke(&self.station, command, data, &self.credential)
            .await?)
    }

    pub async fn ping_obs(&self) -> Result<Version, CommandError> {
        decode_version(self.call("GetVersion", None).await?)
    }

    pub async fn stream_status(&self) -> Result<OutputStatus, CommandError> {
        decode_output_status(self.call("GetStreamStatus", None).await?)
    }

    pub async fn set_stream_settings(&self, key: &str, server: Option<&str>) -> Result<(), CommandError> {
        let data = json!({
            "streamServiceSettings": {
                "bwtest": false,
                "key": key,
                "server": server.unwrap_or(DEFAULT_STREAM_SERVER),
                "service": STREAM_SERVICE,
            },
            "streamServiceType": STREAM_SERVICE_TYPE,
        });
        decode_ack(self.call("SetStreamServiceSettings", Some(data)).await?)
    }

    /// Point the station at the ingest server, then go live.
    pub async fn start_stream(&self, key: &str, server: Option<&str>) -> Result<(), CommandError> {
        self.set_stream_settings(key, server).await?;
        decode_ack(self.call("StartStream", None).await?)
    }

    pub async fn stop_stream(&self) -> Result<(), CommandError> {
        decode_ack(self.call("StopStream", None).await?)
    }

    pub async fn recording_status(&self) -> Result<OutputStatus, CommandError> {
        decode_output_status(self.call("GetRecordStatus", None).await?)
    }

    pub async fn start_recording(&self) -> Result<(), CommandError> {
        decode_ack(self.call("StartRecord", None).await?)
    }

    pub async fn stop_recording(&self) -> Result<(), CommandError> {
        decode_ack(self.call("StopRecord", None).await?)
    }

    pub async fn get_scenes(&self) -> Result<SceneList, CommandError> {
        decode_scene_list(self.call("GetSceneList", None).await?)
    }

    pub async fn set_scene(&self, scene_name: &str) -> Result<(), CommandError> {
        decode_ack(
            self.call("SetCurrentProgramScene", Some(json!({ "sceneName": scene_name })))
                .await?,
        )
    }
}
