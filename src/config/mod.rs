//! Application configuration
//!
//! Loaded from a JSON5 file (missing file = defaults), then overridden by
//! environment variables. Provider credentials are checked at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::provider::DEFAULT_MAX_TOKENS;
use crate::agent::AgentError;
use crate::logging::{LogFormat, LoggingConfig};

/// Default HTTP bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 4111;
/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "PERSONA_CONFIG_PATH";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: ProviderConfig,
    /// Present only when an Ollama endpoint is explicitly configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama: Option<ProviderConfig>,
    /// Upper bound on tokens generated per reply
    pub max_tokens: u32,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            openai: ProviderConfig::default(),
            ollama: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Credentials and endpoint for one model provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Fail unless at least one model provider can be reached.
    pub fn require_provider_credentials(&self) -> Result<(), AgentError> {
        let has_openai_key = self
            .openai
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if has_openai_key || self.ollama.is_some() {
            Ok(())
        } else {
            Err(AgentError::StartupConfigurationMissing(
                "no model provider configured: set OPENAI_API_KEY or configure an Ollama endpoint"
                    .to_string(),
            ))
        }
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = Some(url);
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.ollama.get_or_insert_with(ProviderConfig::default).base_url = Some(url);
        }
        if let Some(host) = lookup("PERSONA_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PERSONA_PORT") {
            self.server.port = port.parse().map_err(|e| ConfigError::InvalidValue {
                key: "PERSONA_PORT".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Some(max_tokens) = lookup("PERSONA_MAX_TOKENS") {
            self.max_tokens = max_tokens
                .parse()
                .ok()
                .filter(|n: &u32| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "PERSONA_MAX_TOKENS".to_string(),
                    message: format!("expected a positive integer, got \"{max_tokens}\""),
                })?;
        }
        if let Some(level) = lookup("PERSONA_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PERSONA_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "PERSONA_LOG_FORMAT".to_string(),
                        message: format!("expected \"json\" or \"text\", got \"{other}\""),
                    })
                }
            };
        }
        Ok(())
    }
}

/// Resolve the configuration file path.
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .map(|dir| dir.join("persona").join("persona.json5"))
        .unwrap_or_else(|| PathBuf::from("persona.json5"))
}

/// Load the configuration file and apply environment overrides.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_file(&get_config_path())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// Parse a JSON5 configuration file. A missing file yields defaults.
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(AppConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    json5::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
