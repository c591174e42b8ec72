//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the relay: the WebSocket
//! endpoint, the operational endpoints and static file hosting.

use crate::{handlers, state::AppState, ws::ws_handler};

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&app_state.config.static_dir);

    Router::new()
        .route("/", get(handlers::root))
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .fallback_service(static_files)
        .with_state(app_state)
}
