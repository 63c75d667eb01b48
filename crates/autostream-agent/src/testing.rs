//! Scripted control socket for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use autostream_common::bus::{InMemoryBus, Subscription};
use autostream_common::models::StationId;
use autostream_common::protocol::Topics;

use crate::liveness::LivenessParams;
use crate::obsws::{ControlSession, ControlSocket, SocketError};
use crate::AgentState;

pub type Responder = Arc<dyn Fn(&str, Option<&Value>) -> Result<Option<Value>, SocketError> + Send + Sync>;

/// Accepts `password`, answers every request through `responder` and logs
/// request names in order.
pub struct FakeSocket {
    password: String,
    reachable: bool,
    hangs: bool,
    responder: Responder,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeSocket {
    pub fn new(
        password: &str,
        responder: impl Fn(&str, Option<&Value>) -> Result<Option<Value>, SocketError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            password: password.into(),
            reachable: true,
            hangs: false,
            responder: Arc::new(responder),
            log: Arc::default(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new("", |_, _| Ok(None))
        }
    }

    /// Never completes a handshake.
    pub fn hung() -> Self {
        Self {
            hangs: true,
            ..Self::new("", |_, _| Ok(None))
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlSocket for FakeSocket {
    async fn open(&self, password: &str) -> Result<Box<dyn ControlSession>, SocketError> {
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if !self.reachable {
            return Err(SocketError::Unreachable("Connection refused (os error 111)".into()));
        }
        if password != self.password {
            return Err(SocketError::AuthFailed);
        }
        Ok(Box::new(FakeSession {
            responder: self.responder.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeSession {
    responder: Responder,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ControlSession for FakeSession {
    async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Option<Value>, SocketError> {
        self.log.lock().unwrap().push(request_type.to_string());
        (self.responder)(request_type, data.as_ref())
    }

    async fn close(self: Box<Self>) {}
}

// ── Agent wiring ────────────────────────────────────────────────────

/// Agent state over an in-memory bus. Keep the sender alive for as long
/// as the loops under test should run.
pub fn agent_state(socket: Arc<FakeSocket>, bus: &InMemoryBus) -> (Arc<AgentState>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AgentState {
        station: StationId::from_endpoint("10.0.0.5", 4455),
        topics: Topics::default(),
        obs_password: "pw".into(),
        socket,
        bus: Arc::new(bus.clone()),
        heartbeat_interval: Duration::from_millis(50),
        request_timeout: Duration::from_millis(100),
        liveness: LivenessParams {
            interval_secs: 1,
            ..LivenessParams::default()
        },
        shutdown: shutdown_rx,
    });
    (state, shutdown_tx)
}

/// Records everything published on the given topics.
pub struct Capture {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    _subscription: Subscription,
}

impl Capture {
    pub fn new(bus: &InMemoryBus, filters: &[String]) -> Self {
        let messages: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::default();
        let sink = messages.clone();
        let subscription = bus.subscribe(
            filters,
            Arc::new(move |topic: &str, payload: &[u8]| {
                sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
            }),
        );
        Self {
            messages,
            _subscription: subscription,
        }
    }

    /// Wait up to a second for at least `n` messages.
    pub async fn wait_for(&self, n: usize) -> Vec<(String, Vec<u8>)> {
        for _ in 0..100 {
            if self.messages.lock().unwrap().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.messages()
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }
}
