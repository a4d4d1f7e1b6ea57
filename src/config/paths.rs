use crate::config::schema::Config;
use crate::error::{LlamaCppError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration root, shared with the `llm` CLI
pub const ROOT_ENV: &str = "LLM_USER_PATH";

const PLUGIN_DIR: &str = "llama-cpp";
const MODELS_FILE: &str = "models.json";
const MODELS_DIR: &str = "models";

/// Filesystem layout rooted at one configuration directory
///
/// ```text
/// <root>/llama-cpp/models.json   registry document
/// <root>/llama-cpp/models/       downloaded model files
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPaths {
    root: PathBuf,
}

impl PluginPaths {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Pick the root: explicit flag, then `LLM_USER_PATH`, then config, then the platform default
    pub fn resolve(explicit: Option<PathBuf>, config: &Config) -> Result<Self> {
        if let Some(root) = explicit {
            return Ok(Self::new(root));
        }
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(root));
        }
        if let Some(root) = &config.root {
            return Ok(Self::new(root.clone()));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| LlamaCppError::Config("Cannot determine config directory".to_string()))?;
        Ok(Self::new(config_dir.join("io.datasette.llm")))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn plugin_dir(&self) -> PathBuf {
        self.root.join(PLUGIN_DIR)
    }

    /// Location of the registry document. Not created here.
    #[must_use]
    pub fn models_file(&self) -> PathBuf {
        self.plugin_dir().join(MODELS_FILE)
    }

    /// Managed model directory, created on first use
    pub fn models_dir(&self) -> Result<PathBuf> {
        let dir = self.plugin_dir().join(MODELS_DIR);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            tracing::info!("Created models directory: {}", dir.display());
        }
        Ok(dir)
    }
}
