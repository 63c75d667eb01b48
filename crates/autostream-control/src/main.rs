//! Autostream control service
//!
//! Single binary that runs:
//! - REST API for operators and the chat-bot
//! - MQTT relay to station agents (requests out, responses/liveness/heartbeats in)

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use autostream_common::auth::PlaintextCredentials;
use autostream_common::bus::{Bus, InMemoryBus, MqttBus};
use autostream_control::bus_handler::{self, StationHealth};
use autostream_control::config::{BusKind, Config};
use autostream_control::correlation::CorrelationRegister;
use autostream_control::invoker::Invoker;
use autostream_control::stations::{InMemoryDirectory, StationDirectory};
use autostream_control::{api, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────
    let config = Config::from_env()?;

    // ── Station directory ───────────────────────────────────────
    let directory: Arc<dyn StationDirectory> = match &config.stations_file {
        Some(path) => Arc::new(InMemoryDirectory::load(path)?),
        None => {
            tracing::warn!("STATIONS_FILE not set, starting with an empty station directory");
            Arc::new(InMemoryDirectory::new())
        }
    };

    // ── Relay ───────────────────────────────────────────────────
    let register = CorrelationRegister::new(config.dispatch_mode);
    let health = StationHealth::new();
    let handler = bus_handler::handler(config.topics.clone(), register.clone(), health.clone());
    let filters = bus_handler::subscriptions(&config.topics);

    // Keeps an in-memory subscription alive for the life of the process.
    let mut _memory_subscription = None;
    let bus: Arc<dyn Bus> = match config.bus {
        BusKind::Mqtt => Arc::new(MqttBus::connect(&config.mqtt, &filters, handler).await?),
        BusKind::Memory => {
            tracing::warn!("BUS=memory: no broker, only in-process agents can answer");
            let bus = InMemoryBus::new();
            _memory_subscription = Some(bus.subscribe(&filters, handler));
            Arc::new(bus)
        }
    };

    let invoker = Invoker::new(bus, register, config.topics.clone()).with_timeout(config.request_timeout);
    tracing::info!(
        mode = ?config.dispatch_mode,
        timeout_secs = config.request_timeout.as_secs(),
        "relay ready"
    );

    // ── Shared state ────────────────────────────────────────────
    let state = state::AppState::new(invoker, directory, Arc::new(PlaintextCredentials), health);

    // ── Router ──────────────────────────────────────────────────
    let app = Router::new()
        .nest("/api", api::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // ── Listen ──────────────────────────────────────────────────
    tracing::info!("autostream-control listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
