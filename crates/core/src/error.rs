use std::time::Duration;

/// Failures a relay session can observe on either connection.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to connect upstream: {0}")]
    Connect(String),
    #[error("Upstream handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RelayError {
    /// Wraps any displayable transport error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
