//! Server configuration loading from file and environment variables.

use crate::assistant;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use voxbridge_call::CallConfig;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Messaging provider credentials and endpoints.
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Conversation engine connection.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call tunables.
    #[serde(default)]
    pub call: CallConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxbridge_call=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalingConfig {
    /// Base URL of the provider's calling API, without a trailing slash.
    #[serde(default = "default_signaling_base_url")]
    pub api_base_url: String,

    /// Bearer token used when answering calls.
    #[serde(default)]
    pub access_token: String,

    /// Shared secret expected on inbound webhook requests.
    #[serde(default)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_signaling_base_url() -> String {
    "https://graph.facebook.com/v23.0".to_string()
}

fn default_engine_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_signaling_base_url(),
            access_token: String::new(),
            webhook_secret: String::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Checks that every secret the server needs at runtime is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming each empty setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.signaling.access_token.trim().is_empty() {
            missing.push("signaling.access_token");
        }
        if self.signaling.webhook_secret.trim().is_empty() {
            missing.push("signaling.webhook_secret");
        }
        if self.engine.api_key.trim().is_empty() {
            missing.push("engine.api_key");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing.join(", ")))
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Required settings are empty.
    #[error("missing required configuration: {0}")]
    Missing(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXBRIDGE_HOST` overrides `server.host`
/// - `VOXBRIDGE_PORT` overrides `server.port`
/// - `VOXBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `VOXBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VOXBRIDGE_SIGNALING_TOKEN` overrides `signaling.access_token`
/// - `VOXBRIDGE_WEBHOOK_SECRET` overrides `signaling.webhook_secret`
/// - `VOXBRIDGE_ENGINE_API_KEY` overrides `engine.api_key`
/// - `VOXBRIDGE_CALL_TIMEOUT_SECONDS` overrides `call.call_timeout_seconds`
///
/// The assistant prompt and medication context fill in whatever the
/// `[call.context]` table leaves empty.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = read_config_file(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    assistant::fill_defaults(&mut config.call.context);
    Ok(config)
}

fn read_config_file(path: Option<&str>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::FileRead(e)),
        },
        None => Ok(Config::default()),
    }
}

/// Applies `VOXBRIDGE_*` overrides read through `lookup`. Values that fail to
/// parse are ignored.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("VOXBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("VOXBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("VOXBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("VOXBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(token) = lookup("VOXBRIDGE_SIGNALING_TOKEN") {
        config.signaling.access_token = token;
    }
    if let Some(secret) = lookup("VOXBRIDGE_WEBHOOK_SECRET") {
        config.signaling.webhook_secret = secret;
    }
    if let Some(key) = lookup("VOXBRIDGE_ENGINE_API_KEY") {
        config.engine.api_key = key;
    }
    if let Some(timeout) = lookup("VOXBRIDGE_CALL_TIMEOUT_SECONDS") {
        if let Ok(parsed) = timeout.parse() {
            config.call.call_timeout_seconds = parsed;
        }
    }
}
