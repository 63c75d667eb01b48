//! Periodic station heartbeat on the state topic.

use std::sync::Arc;
use std::time::Duration;

use autostream_common::bus::Delivery;
use autostream_common::protocol::StationHeartbeat;

use crate::obsws::ControlSocket;
use crate::AgentState;

/// Whether the control socket accepts the password and answers GetVersion
/// within `limit`.
pub async fn probe(socket: &dyn ControlSocket, password: &str, limit: Duration) -> bool {
    let attempt = async {
        let mut session = socket.open(password).await?;
        let version = session.request("GetVersion", None).await;
        session.close().await;
        version
    };
    match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "control socket probe failed");
            false
        }
        Err(_) => {
            tracing::debug!("control socket probe timed out");
            false
        }
    }
}

/// Publish a heartbeat every `heartbeat_interval` until shutdown.
pub async fn run(state: Arc<AgentState>) {
    let mut interval = tokio::time::interval(state.heartbeat_interval);
    let mut shutdown = state.shutdown.clone();
    let mut last_state = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let up = probe(state.socket.as_ref(), &state.obs_password, state.heartbeat_interval).await;
        if last_state != Some(up) {
            tracing::info!(station = %state.station, up, "control socket state changed");
            last_state = Some(up);
        }

        let heartbeat = StationHeartbeat::now(state.station.clone(), up);
        let body = match serde_json::to_vec(&heartbeat) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize heartbeat");
                continue;
            }
        };
        if let Err(e) = state
            .bus
            .publish(&state.topics.state, body, Delivery::FireAndForget)
            .await
        {
            tracing::warn!(error = %e, "failed to publish heartbeat");
        }
    }
}
