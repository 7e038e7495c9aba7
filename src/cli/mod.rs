//! Application configuration for the `pmux` binary.

use crate::providers::factory::default_model;
use crate::providers::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".provider-mux";
const ENV_PREFIX: &str = "PMUX";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    NoHomeDir,

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration file already exists: {0}")]
    AlreadyExists(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// JSONL tracing of tool rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// `~/` is expanded to the home directory
    pub path: String,
    pub omit_system_prompt: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: format!("~/{}/trace.jsonl", CONFIG_DIR),
            omit_system_prompt: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::new(ProviderKind::Ollama, default_model(ProviderKind::Ollama)),
            tracing: TracingConfig::default(),
        }
    }
}

impl AppConfig {
    /// `~/.provider-mux/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(CONFIG_DIR).join("config.toml"))
    }

    /// Load `path` (optional) and overlay `PMUX_*` environment variables,
    /// e.g. `PMUX_PROVIDER__API_KEY`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: &Path, env: config::Environment) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let settings = config::Config::builder()
            .set_default("provider.provider", defaults.provider.provider.as_str())?
            .set_default("provider.model", defaults.provider.model)?
            .add_source(config::File::from(path).required(false))
            .add_source(env.prefix_separator("_").separator("__"))
            .build()?;

        let loaded: AppConfig = settings.try_deserialize()?;
        tracing::debug!(
            "Loaded configuration from {}: provider={}, model={}",
            path.display(),
            loaded.provider.provider,
            loaded.provider.model
        );
        Ok(loaded)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write a default configuration file, refusing to overwrite an existing one
    pub fn write_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config = Self::default();
        std::fs::write(path, config.to_toml_string()?)?;
        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }
}
