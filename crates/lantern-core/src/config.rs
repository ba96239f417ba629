//! Host configuration, loaded once at startup
//!
//! The core only ever reads configuration; nothing in the runtime writes it
//! back. Values cover the UI theme, model defaults, sampling parameters and
//! the addon runtime knobs.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::{LoadParams, SamplingParams};

/// Lantern configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ui: UiConfig,
    pub model: ModelConfig,
    pub sampling: SamplingConfig,
    pub addons: AddonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub theme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model file loaded by `lantern run` when no path is given
    pub default_path: Option<PathBuf>,
    pub threads: usize,
    pub context_length: u32,
    pub gpu_layers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonConfig {
    /// Addon directory override; defaults to `~/.lantern/addons`
    pub directory: Option<PathBuf>,
    /// Background polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Per-invocation budget for a background tick in milliseconds
    pub invocation_timeout_ms: u64,
    /// Consecutive failures before an addon is suspended
    pub failure_threshold: u32,
    /// Grace period for addon shutdown in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { theme: "dark".to_string() }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_path: None,
            threads: 4,
            context_length: 4096,
            gpu_layers: 0,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
        }
    }
}

impl Default for AddonConfig {
    fn default() -> Self {
        Self {
            directory: None,
            poll_interval_ms: 1000,
            invocation_timeout_ms: 2000,
            failure_threshold: 3,
            shutdown_grace_ms: 3000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ui: UiConfig::default(),
            model: ModelConfig::default(),
            sampling: SamplingConfig::default(),
            addons: AddonConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LANTERN_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| {
                    Error::ConfigError("could not determine config directory".to_string())
                })?
                .join("lantern")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&contents).map_err(|e| {
                Error::ConfigError(format!("failed to parse {}: {e}", path.display()))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.sampling.temperature) {
            return Err(Error::ConfigError(
                "sampling.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.model.threads == 0 {
            return Err(Error::ConfigError("model.threads must be at least 1".to_string()));
        }
        if self.addons.poll_interval_ms == 0 {
            return Err(Error::ConfigError(
                "addons.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.addons.failure_threshold == 0 {
            return Err(Error::ConfigError(
                "addons.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Model load parameters from the configured defaults
    pub fn load_params(&self) -> LoadParams {
        LoadParams {
            threads: self.model.threads,
            context_length: self.model.context_length,
            gpu_layers: self.model.gpu_layers,
        }
    }

    /// Sampling parameters from the configured defaults
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            max_tokens: self.sampling.max_tokens,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            "ui.theme" => Ok(self.ui.theme.clone()),
            "model.default_path" => Ok(self
                .model
                .default_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())),
            "model.threads" => Ok(self.model.threads.to_string()),
            "model.context_length" => Ok(self.model.context_length.to_string()),
            "model.gpu_layers" => Ok(self.model.gpu_layers.to_string()),
            "sampling.temperature" => Ok(self.sampling.temperature.to_string()),
            "sampling.top_p" => Ok(self.sampling.top_p.to_string()),
            "sampling.max_tokens" => Ok(self.sampling.max_tokens.to_string()),
            "addons.directory" => Ok(self
                .addons
                .directory
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())),
            "addons.poll_interval_ms" => Ok(self.addons.poll_interval_ms.to_string()),
            "addons.invocation_timeout_ms" => Ok(self.addons.invocation_timeout_ms.to_string()),
            "addons.failure_threshold" => Ok(self.addons.failure_threshold.to_string()),
            "addons.shutdown_grace_ms" => Ok(self.addons.shutdown_grace_ms.to_string()),
            _ => Err(Error::ConfigError(format!(
                "unknown configuration key: {key}. Use `lantern config list` to see available keys."
            ))),
        }
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let keys = [
            "ui.theme",
            "model.default_path",
            "model.threads",
            "model.context_length",
            "model.gpu_layers",
            "sampling.temperature",
            "sampling.top_p",
            "sampling.max_tokens",
            "addons.directory",
            "addons.poll_interval_ms",
            "addons.invocation_timeout_ms",
            "addons.failure_threshold",
            "addons.shutdown_grace_ms",
        ];

        keys.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }
}
