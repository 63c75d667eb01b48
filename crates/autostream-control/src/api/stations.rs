//! Station endpoints.
//!
//! GET    /api/stations                          list stations
//! PUT    /api/stations/{name}                   add or replace a station
//! DELETE /api/stations/{name}                   remove a station
//! GET    /api/stations/{name}/ping              is the control socket answering
//! GET    /api/stations/{name}/stream            stream state and elapsed time
//! POST   /api/stations/{name}/stream/start      configure ingest and go live
//! POST   /api/stations/{name}/stream/stop       stop streaming
//! GET    /api/stations/{name}/recording         recording state and elapsed time
//! POST   /api/stations/{name}/recording/start   start recording
//! POST   /api/stations/{name}/recording/stop    stop recording
//! GET    /api/stations/{name}/scenes            current and available scenes
//! POST   /api/stations/{name}/scenes/current    switch program scene
//! GET    /api/stations/{name}/health            latest heartbeat and liveness report

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use autostream_common::models::StationRecord;

use crate::api::error::ApiError;
use crate::bus_handler::HealthSnapshot;
use crate::commands::{OutputStatus, SceneList, StationClient, Version};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stations))
        .route("/{name}", axum::routing::put(put_station).delete(delete_station))
        .route("/{name}/ping", get(ping_station))
        .route("/{name}/stream", get(stream_status))
        .route("/{name}/stream/start", post(start_stream))
        .route("/{name}/stream/stop", post(stop_stream))
        .route("/{name}/recording", get(recording_status))
        .route("/{name}/recording/start", post(start_recording))
        .route("/{name}/recording/stop", post(stop_recording))
        .route("/{name}/scenes", get(get_scenes))
        .route("/{name}/scenes/current", post(set_scene))
        .route("/{name}/health", get(station_health))
}

/// Look up a station by name and build a client for it.
async fn client(state: &AppState, name: &str) -> Result<StationClient, ApiError> {
    let record = state
        .directory()
        .get(name)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown station {name}")))?;
    Ok(state.client_for(&record)?)
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub response: String,
}

fn done(msg: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        response: msg.to_string(),
    })
}

// ── Directory ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StationSummary {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Identity used on the bus.
    pub station_id: String,
}

impl From<StationRecord> for StationSummary {
    fn from(record: StationRecord) -> Self {
        Self {
            station_id: record.station_id().to_string(),
            name: record.name,
            host: record.host,
            port: record.port,
        }
    }
}

async fn list_stations(State(state): State<AppState>) -> Json<Vec<StationSummary>> {
    let stations = state.directory().list().await;
    Json(stations.into_iter().map(StationSummary::from).collect())
}

#[derive(Debug, Deserialize)]
pub struct PutStationRequest {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
}

async fn put_station(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PutStationRequest>,
) -> Result<(StatusCode, Json<StationSummary>), ApiError> {
    if body.host.trim().is_empty() {
        return Err(ApiError::bad_request("host must not be empty"));
    }
    let record = StationRecord {
        name,
        host: body.host,
        port: body.port,
        password: body.password,
    };
    let created = state.directory().put(record.clone()).await;
    tracing::info!(station = %record.name, id = %record.station_id(), created, "station saved");

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(record.into())))
}

async fn delete_station(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.directory().remove(&name).await {
        Some(_) => {
            tracing::info!(station = %name, "station removed");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found(format!("unknown station {name}"))),
    }
}

// ── Ping ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub available: bool,
    #[serde(flatten)]
    pub version: Version,
}

async fn ping_station(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PingResponse>, ApiError> {
    let version = client(&state, &name).await?.ping_obs().await?;
    Ok(Json(PingResponse {
        available: true,
        version,
    }))
}

// ── Stream ──────────────────────────────────────────────────────────

async fn stream_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<OutputStatus>, ApiError> {
    let status = client(&state, &name).await?.stream_status().await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub key: String,
    #[serde(default)]
    pub server: Option<String>,
}

async fn start_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<StartStreamRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if body.key.is_empty() {
        return Err(ApiError::bad_request("stream key must not be empty"));
    }
    let client = client(&state, &name).await?;
    if client.stream_status().await?.active {
        return Err(ApiError::conflict("station is already streaming"));
    }
    client.start_stream(&body.key, body.server.as_deref()).await?;
    tracing::info!(station = %name, "stream started");
    Ok(done("started stream successfully"))
}

async fn stop_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let client = client(&state, &name).await?;
    if !client.stream_status().await?.active {
        return Err(ApiError::conflict("stream not running"));
    }
    client.stop_stream().await?;
    tracing::info!(station = %name, "stream stopped");
    Ok(done("stopped stream successfully"))
}

// ── Recording ───────────────────────────────────────────────────────

async fn recording_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<OutputStatus>, ApiError> {
    let status = client(&state, &name).await?.recording_status().await?;
    Ok(Json(status))
}

async fn start_recording(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let client = client(&state, &name).await?;
    if client.recording_status().await?.active {
        return Err(ApiError::conflict("station is already recording"));
    }
    client.start_recording().await?;
    tracing::info!(station = %name, "recording started");
    Ok(done("started recording successfully"))
}

async fn stop_recording(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let client = client(&state, &name).await?;
    if !client.recording_status().await?.active {
        return Err(ApiError::conflict("recording not running"));
    }
    client.stop_recording().await?;
    tracing::info!(station = %name, "recording stopped");
    Ok(done("stopped recording successfully"))
}

// ── Scenes ──────────────────────────────────────────────────────────

async fn get_scenes(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SceneList>, ApiError> {
    let scenes = client(&state, &name).await?.get_scenes().await?;
    Ok(Json(scenes))
}

#[derive(Debug, Deserialize)]
pub struct SetSceneRequest {
    pub scene_name: String,
}

async fn set_scene(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetSceneRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let client = client(&state, &name).await?;
    if !client.get_scenes().await?.contains(&body.scene_name) {
        return Err(ApiError::not_found(format!("no scene named {}", body.scene_name)));
    }
    client.set_scene(&body.scene_name).await?;
    tracing::info!(station = %name, scene = %body.scene_name, "program scene switched");
    Ok(done("scene switched successfully"))
}

// ── Health ──────────────────────────────────────────────────────────

async fn station_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<HealthSnapshot>, ApiError> {
    let record = state
        .directory()
        .get(&name)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown station {name}")))?;
    Ok(Json(state.health().snapshot(&record.station_id())))
}
