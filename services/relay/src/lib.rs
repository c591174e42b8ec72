//! Realtime Relay API Library Crate
//!
//! This library contains the HTTP side of the realtime relay: configuration,
//! application state, the health and landing-page handlers, the WebSocket
//! upgrade path and the upstream connector. The `relay` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
