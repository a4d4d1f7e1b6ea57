use crate::error::{LlamaCppError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    /// Overrides the configuration root holding `llama-cpp/models.json`
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub prompt: PromptDefaults,
    #[serde(default)]
    pub download: DownloadConfig,
}

/// Defaults for options not given on the command line
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PromptDefaults {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    #[serde(default = "default_n_gpu_layers")]
    pub n_gpu_layers: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DownloadConfig {
    #[serde(default = "default_true")]
    pub show_progress: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// Default value functions
fn default_max_tokens() -> usize {
    4000
}
fn default_n_ctx() -> u32 {
    4000
}
fn default_n_gpu_layers() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for PromptDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            n_ctx: default_n_ctx(),
            n_gpu_layers: default_n_gpu_layers(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            show_progress: default_true(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from the default location, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            LlamaCppError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::config_dir()
            .ok_or_else(|| LlamaCppError::Config("Cannot determine config directory".to_string()))?
    };

    Ok(config_dir.join("llm-llama-cpp").join("config.toml"))
}
