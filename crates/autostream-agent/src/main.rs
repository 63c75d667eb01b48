//! Autostream station agent
//!
//! Daemon running next to each broadcast station's production application.
//!
//! - Connects to the MQTT broker with exponential backoff
//! - Executes relayed requests on the local control socket, one at a time
//! - Publishes a heartbeat with the control socket's reachability
//! - Samples input sources and reports the ones showing a blank frame

mod config;
mod control;
mod executor;
mod heartbeat;
mod liveness;
mod obsws;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use autostream_common::bus::Bus;
use autostream_common::models::StationId;
use autostream_common::protocol::Topics;

use crate::config::{AgentConfig, Cli};
use crate::liveness::LivenessParams;
use crate::obsws::{ControlSocket, ObsWebSocket};

/// Shared agent state accessible from all tasks.
pub struct AgentState {
    pub station: StationId,
    pub topics: Topics,
    /// Password for the agent's own calls (heartbeat, liveness). Relayed
    /// requests carry their own.
    pub obs_password: String,
    pub socket: Arc<dyn ControlSocket>,
    pub bus: Arc<dyn Bus>,
    pub heartbeat_interval: Duration,
    /// Upper bound on one relayed request against the control socket.
    pub request_timeout: Duration,
    pub liveness: LivenessParams,
    pub shutdown: watch::Receiver<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(&cli)?;
    let station = config.station_id();
    let socket = ObsWebSocket::new(&config.obs.host, config.obs.port);

    tracing::info!(
        station = %station,
        control_socket = %socket.url(),
        broker = %config.mqtt.host,
        "autostream-agent starting"
    );

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Requests are queued by the bus callback and drained by the executor.
    let (queue_tx, queue_rx) = mpsc::channel::<Vec<u8>>(executor::QUEUE_CAPACITY);
    let filters = [config.topics.request_topic(&station)];

    let bus = tokio::select! {
        bus = control::connect(&config.mqtt, &filters, executor::handler(queue_tx)) => bus,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT before connecting, exiting");
            return Ok(());
        }
    };
    let bus = Arc::new(bus);

    let state = Arc::new(AgentState {
        station,
        topics: config.topics.clone(),
        obs_password: config.obs.password.clone(),
        socket: Arc::new(socket),
        bus: bus.clone(),
        heartbeat_interval: config.heartbeat_interval(),
        request_timeout: config.request_timeout(),
        liveness: config.liveness.clone(),
        shutdown: shutdown_rx,
    });

    // ── Task 1: Request executor ────────────────────────────────
    let executor_handle = tokio::spawn(executor::run(state.clone(), queue_rx));

    // ── Task 2: Heartbeat ───────────────────────────────────────
    let heartbeat_handle = tokio::spawn(heartbeat::run(state.clone()));

    // ── Task 3: Liveness sampler ────────────────────────────────
    let liveness_handle = tokio::spawn(liveness::run(state.clone()));

    // ── Shutdown handling ───────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = executor_handle => {
            if let Err(e) = result {
                tracing::error!("executor task failed: {e}");
            }
        }
    }
    let _ = shutdown_tx.send(true);

    for handle in [heartbeat_handle, liveness_handle] {
        if let Err(e) = handle.await {
            tracing::error!("background task failed: {e}");
        }
    }
    bus.shutdown().await;

    tracing::info!("autostream-agent stopped");
    Ok(())
}
