//! Configuration module for llm-llama-cpp
//!
//! Loads config from `$XDG_CONFIG_HOME/llm-llama-cpp/config.toml` or `~/.config/llm-llama-cpp/config.toml`.
//! Falls back to embedded defaults if file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! The configuration root that holds the model registry is resolved once and
//! passed around explicitly as [`PluginPaths`].
//!
//! # Example
//!
//! ```no_run
//! use llm_llama_cpp::config::{Config, PluginPaths};
//!
//! let config = Config::load().expect("Failed to load config");
//! let paths = PluginPaths::resolve(None, &config).expect("No config root");
//! println!("Registry: {}", paths.models_file().display());
//! println!("Default max tokens: {}", config.prompt.max_tokens);
//! ```

pub mod paths;
pub mod schema;

pub use paths::PluginPaths;
pub use schema::Config;
