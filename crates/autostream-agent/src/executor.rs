//! Runs relayed requests against the local control socket.
//!
//! The bus callback only enqueues the raw payload. A single worker drains
//! the queue, so requests execute one at a time in arrival order and a
//! slow control socket never stalls the bus connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use autostream_common::bus::{Delivery, MessageHandler};
use autostream_common::protocol::{RequestEnvelope, ResponseEnvelope};

use crate::obsws::{ControlSocket, SocketError};
use crate::AgentState;

/// Requests buffered between the bus callback and the worker.
pub const QUEUE_CAPACITY: usize = 64;

pub const WRONG_PASSWORD: &str = "wrong password";

/// Reply when the control socket neither answers nor fails within the limit.
pub const TIMED_OUT: &str = "control socket unreachable: timed out";

/// Bus callback for the request topic.
pub fn handler(queue: mpsc::Sender<Vec<u8>>) -> MessageHandler {
    Arc::new(move |topic: &str, payload: &[u8]| {
        if let Err(e) = queue.try_send(payload.to_vec()) {
            tracing::warn!(topic, error = %e, "dropping request");
        }
    })
}

/// Drain the queue until shutdown, answering each request on the
/// station's response topic.
pub async fn run(state: Arc<AgentState>, mut queue: mpsc::Receiver<Vec<u8>>) {
    let topic = state.topics.response_topic(&state.station);
    let mut shutdown = state.shutdown.clone();

    loop {
        let payload = tokio::select! {
            next = queue.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let response = handle(state.socket.as_ref(), &payload, state.request_timeout).await;
        let body = match response.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response");
                continue;
            }
        };
        if let Err(e) = state.bus.publish(&topic, body, Delivery::Exactly).await {
            tracing::warn!(error = %e, "failed to publish response");
        }
    }

    tracing::info!("executor stopped");
}

/// Decode one request payload and execute it within `limit`. Never fails:
/// every problem becomes the response's `error`.
pub async fn handle(socket: &dyn ControlSocket, payload: &[u8], limit: Duration) -> ResponseEnvelope {
    let request = match RequestEnvelope::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed request");
            return ResponseEnvelope::err(format!("malformed request: {e}"));
        }
    };

    tracing::debug!(request = %request.request, request_id = ?request.request_id, "executing");
    let response = match tokio::time::timeout(limit, execute(socket, &request)).await {
        Ok(response) => response,
        Err(_) => ResponseEnvelope::err(TIMED_OUT),
    };
    if let Some(error) = &response.error {
        tracing::warn!(request = %request.request, %error, "request failed");
    }
    response.with_request_id(request.request_id)
}

/// Open a session with the request's credential and perform the call.
pub async fn execute(socket: &dyn ControlSocket, request: &RequestEnvelope) -> ResponseEnvelope {
    let mut session = match socket.open(&request.credential).await {
        Ok(session) => session,
        Err(SocketError::AuthFailed) => return ResponseEnvelope::err(WRONG_PASSWORD),
        Err(e) => return ResponseEnvelope::err(format!("control socket unreachable: {e}")),
    };

    let result = session.request(&request.request, request.data.clone()).await;
    session.close().await;

    match result {
        Ok(data) => ResponseEnvelope::ok(data),
        Err(SocketError::Request { comment: None, .. }) => {
            ResponseEnvelope::err(format!("failed on remote command: {}", request.request))
        }
        Err(SocketError::Request { comment: Some(comment), .. }) => {
            ResponseEnvelope::err(format!("failed on remote command: {}: {comment}", request.request))
        }
        Err(e) => ResponseEnvelope::err(format!("failed on remote command: {}: {e}", request.request)),
    }
}
