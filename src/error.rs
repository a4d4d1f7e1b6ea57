use std::path::PathBuf;
use thiserror::Error;

/// Main error type for llm-llama-cpp
#[derive(Error, Debug)]
pub enum LlamaCppError {
    #[error("Registry file {path} is corrupt: {reason}\n\nTroubleshooting:\n- Inspect the file: llm-llama-cpp models-file\n- Fix or remove the broken entry by hand; it is never repaired automatically")]
    CorruptRegistry { path: PathBuf, reason: String },

    #[error("Name '{name}' is already in use by model '{owner}'\n\nTroubleshooting:\n- Pick a different --id or --alias\n- Free the name first: llm-llama-cpp aliases remove {name}")]
    Collision { name: String, owner: String },

    #[error("Unknown model: '{name}'{}\n\nTroubleshooting:\n- List registered models: llm-llama-cpp models", suggestion_hint(.suggestion))]
    UnknownModel {
        name: String,
        suggestion: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}\n\nTroubleshooting:\n- Check the URL and your internet connection\n- A partial .part file may remain in: llm-llama-cpp models-dir")]
    Fetch(String),

    #[error("Inference error: {0}\n\nTroubleshooting:\n- Re-run with --verbose to see llama.cpp diagnostics\n- Try --no-gpu or a smaller --n-ctx")]
    Engine(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/llm-llama-cpp/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("{0}")]
    InvalidInput(String),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(". Did you mean '{s}'?"))
        .unwrap_or_default()
}

impl LlamaCppError {
    /// Process exit code for this failure
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::UnknownModel { .. } => 2,
            Self::Collision { .. } => 3,
            Self::Fetch(_) => 4,
            Self::Engine(_) => 5,
            Self::CorruptRegistry { .. } => 6,
            Self::Config(_) | Self::InvalidInput(_) => 7,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlamaCppError>;
