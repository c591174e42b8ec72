use secrecy::{ExposeSecret, SecretString};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Instruction text used when `INSTRUCTIONS_PATH` is not set.
pub const DEFAULT_INSTRUCTIONS: &str = include_str!("../prompts/instructions.md");

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub realtime_model: String,
    pub openai_beta: String,
    pub instructions: String,
    pub static_dir: PathBuf,
    pub connect_timeout: Option<Duration>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host_str = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue("HOST".to_string(), e.to_string()))?;

        let port_str = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), e.to_string()))?;

        // A missing key is not fatal: the upstream rejects the handshake and
        // each session reports that to its client.
        let openai_api_key = SecretString::from(std::env::var("OPENAI_API_KEY").unwrap_or_default());

        let realtime_url = std::env::var("REALTIME_URL")
            .unwrap_or_else(|_| "wss://api.openai.com/v1/realtime".to_string());
        let realtime_model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-10-01".to_string());
        let openai_beta = std::env::var("OPENAI_BETA").unwrap_or_else(|_| "realtime=v1".to_string());

        let instructions = match std::env::var("INSTRUCTIONS_PATH") {
            Ok(path) => {
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?
            }
            Err(_) => DEFAULT_INSTRUCTIONS.to_string(),
        };
        let instructions = instructions.trim_end().to_string();

        let static_dir = std::env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("public"));

        let connect_timeout = match std::env::var("UPSTREAM_CONNECT_TIMEOUT_SECS") {
            Ok(secs) => {
                let secs = secs.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue(
                        "UPSTREAM_CONNECT_TIMEOUT_SECS".to_string(),
                        e.to_string(),
                    )
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue(
                        "UPSTREAM_CONNECT_TIMEOUT_SECS".to_string(),
                        "must be greater than zero".to_string(),
                    ));
                }
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address: SocketAddr::new(host, port),
            openai_api_key,
            realtime_url,
            realtime_model,
            openai_beta,
            instructions,
            static_dir,
            connect_timeout,
            log_level,
        })
    }

    pub fn has_api_key(&self) -> bool {
        !self.openai_api_key.expose_secret().is_empty()
    }

    /// The upstream endpoint, with the model selected in the query string.
    pub fn upstream_url(&self) -> String {
        format!("{}?model={}", self.realtime_url, self.realtime_model)
    }
}
