//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the read-only
//! configuration and the upstream connector shared by every session.

use crate::{config::Config, ws::OpenAIConnector};
use relay_core::{RelaySettings, SessionConfig, SessionUpdate, UpstreamConnector};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay_settings: Arc<RelaySettings>,
    pub connector: Arc<dyn UpstreamConnector>,
}

impl AppState {
    /// Builds the state for the OpenAI Realtime API.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let connector = Arc::new(OpenAIConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    /// Builds the state around any upstream connector.
    pub fn with_connector(config: Arc<Config>, connector: Arc<dyn UpstreamConnector>) -> Self {
        let relay_settings = Arc::new(RelaySettings {
            session_update: SessionUpdate::new(SessionConfig::with_instructions(
                config.instructions.clone(),
            )),
            connect_timeout: config.connect_timeout,
        });
        Self {
            config,
            relay_settings,
            connector,
        }
    }
}
