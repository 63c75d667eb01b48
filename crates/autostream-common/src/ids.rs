//! Prefixed ID generation.
//!
//! Request ids use a `prefix_` followed by a UUIDv7 (time-ordered), so they
//! are unique, sortable by creation time and recognisable in broker logs.

use uuid::Uuid;

/// Generate a prefixed ID using UUIDv7.
fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a correlation id for one in-flight request: `req_<uuid7>`
pub fn request_id() -> String {
    prefixed_id("req")
}

/// Generate a bus client id for a process role, e.g. `control_<uuid7>`.
///
/// MQTT brokers disconnect the older session when two clients share an id,
/// so every process gets its own.
pub fn client_id(role: &str) -> String {
    prefixed_id(role)
}
