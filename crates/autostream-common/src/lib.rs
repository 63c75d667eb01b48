//! Shared types for the Autostream relay.
//!
//! This crate contains:
//! - **Protocol messages**: request/response envelopes, liveness and heartbeat payloads, bus topics
//! - **Bus transport**: the publish/subscribe adapter (MQTT and in-process)
//! - **Credentials**: the provider seam used when sealing requests for a station
//! - **Data models**: station identity and liveness samples
//! - **ID generation**: prefixed UUIDv7 helpers (`req_`, client ids)

pub mod auth;
pub mod bus;
pub mod ids;
pub mod models;
pub mod protocol;
