//! Autostream control service library.
//!
//! Re-exports the API router, the relay core (correlation register, invoker,
//! typed commands) and shared state so they can be used by integration tests.

pub mod api;
pub mod bus_handler;
pub mod commands;
pub mod config;
pub mod correlation;
pub mod invoker;
pub mod state;
pub mod stations;
