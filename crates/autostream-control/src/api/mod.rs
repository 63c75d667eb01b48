//! REST API route tree.

pub mod error;
pub mod stations;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .nest("/stations", stations::router())
}

/// Service liveness; does not touch the bus.
async fn ping() -> Json<Value> {
    Json(json!({ "server": "OK!" }))
}
