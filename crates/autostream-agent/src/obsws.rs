//! Client for the production application's local control socket
//! (obs-websocket protocol v5).
//!
//! Handshake: server `Hello` (op 0, optional auth challenge) → client
//! `Identify` (op 1) → server `Identified` (op 2). Then each call is a
//! `Request` (op 6) answered by a `RequestResponse` (op 7) with the same
//! `requestId`. Events (op 5) are ignored; none are subscribed.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const RPC_VERSION: u64 = 1;
/// Close code the server uses when the Identify credential is wrong.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

mod op {
    pub const HELLO: u64 = 0;
    pub const IDENTIFY: u64 = 1;
    pub const IDENTIFIED: u64 = 2;
    pub const REQUEST: u64 = 6;
    pub const REQUEST_RESPONSE: u64 = 7;
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("{0}")]
    Unreachable(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("request failed with status {code}")]
    Request { code: u64, comment: Option<String> },
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SocketError::Protocol(err.to_string())
    }
}

// ── Seams ───────────────────────────────────────────────────────────

/// Something that can open authenticated sessions to the control socket.
#[async_trait]
pub trait ControlSocket: Send + Sync {
    async fn open(&self, password: &str) -> Result<Box<dyn ControlSession>, SocketError>;
}

/// An identified session; requests run one at a time.
#[async_trait]
pub trait ControlSession: Send {
    async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Option<Value>, SocketError>;

    async fn close(self: Box<Self>);
}

// ── Auth ────────────────────────────────────────────────────────────

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

// ── WebSocket implementation ────────────────────────────────────────

/// The real control socket at `ws://{host}:{port}`.
#[derive(Debug, Clone)]
pub struct ObsWebSocket {
    url: String,
}

impl ObsWebSocket {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ControlSocket for ObsWebSocket {
    async fn open(&self, password: &str) -> Result<Box<dyn ControlSession>, SocketError> {
        let session = ObsSession::connect(&self.url, password).await?;
        Ok(Box::new(session))
    }
}

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ObsSession {
    ws: Ws,
    next_id: u64,
}

impl ObsSession {
    pub async fn connect(url: &str, password: &str) -> Result<Self, SocketError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SocketError::Unreachable(e.to_string()))?;
        let mut session = Self { ws, next_id: 0 };

        let hello = session.expect_op(op::HELLO).await?;
        let authentication = match hello.get("authentication") {
            Some(auth) => {
                let field = |name: &str| {
                    auth.get(name)
                        .and_then(Value::as_str)
                        .ok_or_else(|| SocketError::Protocol(format!("Hello without {name}")))
                };
                Some(auth_response(password, field("salt")?, field("challenge")?))
            }
            None => None,
        };

        let mut identify = json!({ "rpcVersion": RPC_VERSION, "eventSubscriptions": 0 });
        if let Some(auth) = authentication {
            identify["authentication"] = Value::String(auth);
        }
        session.send(op::IDENTIFY, identify).await?;
        session.expect_op(op::IDENTIFIED).await?;

        tracing::debug!(url, "control socket identified");
        Ok(session)
    }

    async fn send(&mut self, opcode: u64, d: Value) -> Result<(), SocketError> {
        let frame = json!({ "op": opcode, "d": d });
        self.ws.send(Message::Text(frame.to_string().into())).await?;
        Ok(())
    }

    /// Read frames until one with a known opcode arrives; return its `d`.
    async fn next_frame(&mut self) -> Result<(u64, Value), SocketError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let mut frame: Value = serde_json::from_str(&text)
                        .map_err(|e| SocketError::Protocol(format!("bad frame: {e}")))?;
                    let opcode = frame
                        .get("op")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| SocketError::Protocol("frame without op".into()))?;
                    return Ok((opcode, frame["d"].take()));
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(f) if u16::from(f.code) == CLOSE_AUTHENTICATION_FAILED => Err(SocketError::AuthFailed),
                        Some(f) => Err(SocketError::Protocol(format!(
                            "closed by server: {} {}",
                            u16::from(f.code),
                            f.reason.as_str()
                        ))),
                        None => Err(SocketError::Protocol("closed by server".into())),
                    };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(SocketError::Protocol("connection closed".into())),
            }
        }
    }

    async fn expect_op(&mut self, expected: u64) -> Result<Value, SocketError> {
        let (opcode, d) = self.next_frame().await?;
        if opcode != expected {
            return Err(SocketError::Protocol(format!("expected op {expected}, got op {opcode}")));
        }
        Ok(d)
    }
}

#[async_trait]
impl ControlSession for ObsSession {
    async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Option<Value>, SocketError> {
        self.next_id += 1;
        let request_id = self.next_id.to_string();

        let mut d = json!({ "requestType": request_type, "requestId": request_id });
        if let Some(data) = data {
            d["requestData"] = data;
        }
        self.send(op::REQUEST, d).await?;

        loop {
            let (opcode, mut d) = self.next_frame().await?;
            if opcode != op::REQUEST_RESPONSE || d["requestId"].as_str() != Some(request_id.as_str()) {
                continue;
            }
            return parse_request_response(&mut d);
        }
    }

    async fn close(mut self: Box<Self>) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "control socket close failed");
        }
    }
}

/// Split a RequestResponse `d` into data or a status failure.
fn parse_request_response(d: &mut Value) -> Result<Option<Value>, SocketError> {
    let status = &d["requestStatus"];
    let ok = status["result"]
        .as_bool()
        .ok_or_else(|| SocketError::Protocol("response without requestStatus.result".into()))?;
    if !ok {
        return Err(SocketError::Request {
            code: status["code"].as_u64().unwrap_or_default(),
            comment: status["comment"].as_str().map(str::to_string),
        });
    }
    match d["responseData"].take() {
        Value::Null => Ok(None),
        data => Ok(Some(data)),
    }
}
