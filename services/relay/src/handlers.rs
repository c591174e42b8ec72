//! Axum Handlers for the HTTP surface
//!
//! The relay itself lives behind the WebSocket upgrade; these handlers only
//! serve the liveness probe and the landing page.

use axum::{
    extract::{
        State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{Html, IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{state::AppState, ws::ws_handler};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Realtime Proxy Server is running".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Serves `/`: WebSocket upgrades start a relay session, plain requests get
/// the landing page.
pub async fn root(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    state: State<Arc<AppState>>,
) -> Response {
    match ws {
        Ok(ws) => ws_handler(ws, state).await,
        Err(_) => landing_page(&state.0).into_response(),
    }
}

fn landing_page(state: &AppState) -> Html<String> {
    let port = state.config.bind_address.port();
    Html(format!(
        r#"<!DOCTYPE html>
<html>
  <head><title>Realtime Proxy Server</title></head>
  <body>
    <h1>Realtime Proxy Server</h1>
    <p>Server is running on port {port}</p>
    <p>WebSocket endpoint: ws://localhost:{port}</p>
    <p>Health check: <a href="/health">/health</a></p>
    <p>Static files are served from <code>{static_dir}</code></p>
  </body>
</html>
"#,
        static_dir = state.config.static_dir.display(),
    ))
}
