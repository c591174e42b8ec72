//! Upstream realtime providers the relay can pair a client with.

pub mod openai;

pub use openai::{OpenAIConnector, install_crypto_provider};
