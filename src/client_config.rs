// CloudShare Client Configuration Module
// Persistent client configuration storage

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::auth::DEFAULT_TOKEN_ENV_VAR;

/// Upper bound for the post-success dismissal delay of an upload batch
pub const MAX_CLEAR_DELAY_MS: u64 = 10_000;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root, e.g. http://localhost:8085/api
    pub base_url: String,
    /// Whole-request timeout in seconds (uploads included)
    pub request_timeout_secs: u64,
    /// TCP/TLS connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// How long a fully successful upload batch stays visible before it is cleared
    pub clear_delay_ms: u64,
    /// Environment variable holding the session's bearer token
    pub token_env_var: String,
    /// Default log level when RUST_LOG is not set
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8085/api".to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            clear_delay_ms: 1000,
            token_env_var: DEFAULT_TOKEN_ENV_VAR.to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Token environment variable name cannot be empty")]
    EmptyTokenVar,

    #[error("Failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Get the path to the client config file
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("cloudshare").join("client_config.json")
}

/// Load client configuration from the default location
pub fn load_config() -> ClientConfig {
    load_config_from(&get_config_path())
}

/// Load client configuration, falling back to defaults when the file is
/// missing, unreadable or invalid
pub fn load_config_from(config_path: &Path) -> ClientConfig {
    if config_path.exists() {
        match fs::read_to_string(config_path) {
            Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
                Ok(mut config) => match validate_config(&mut config) {
                    Ok(()) => return config,
                    Err(e) => {
                        tracing::warn!("Ignoring client config {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to parse client config: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read client config: {}", e);
            }
        }
    }

    ClientConfig::default()
}

/// Save client configuration to the default location
pub fn save_config(config: &ClientConfig) -> Result<PathBuf, ConfigError> {
    let config_path = get_config_path();
    save_config_to(config, &config_path)?;
    Ok(config_path)
}

pub fn save_config_to(config: &ClientConfig, config_path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content)?;

    tracing::info!("Client config saved to {:?}", config_path);
    Ok(())
}

/// Validate client configuration, clamping numeric values to safe ranges
pub fn validate_config(config: &mut ClientConfig) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(config.base_url.trim()).map_err(|e| {
        ConfigError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        }
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    config.base_url = config.base_url.trim().trim_end_matches('/').to_string();

    if config.token_env_var.trim().is_empty() {
        return Err(ConfigError::EmptyTokenVar);
    }

    config.request_timeout_secs = config.request_timeout_secs.clamp(1, 3600);
    config.connect_timeout_secs = config.connect_timeout_secs.clamp(1, 300);
    config.clear_delay_ms = config.clear_delay_ms.min(MAX_CLEAR_DELAY_MS);

    Ok(())
}
