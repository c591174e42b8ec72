//! WebSocket Relay
//!
//! This module contains the WebSocket side of the relay. It is structured into
//! submodules for clarity:
//!
//! - `session`: Upgrades client connections and runs one relay session per socket.
//! - `provider`: Opens the paired upstream connection to the realtime API.

pub mod provider;
pub mod session;

pub use provider::{OpenAIConnector, install_crypto_provider};
pub use session::ws_handler;
