pub mod completion;
pub mod config;
pub mod error;
pub mod models;

pub use error::{LlamaCppError, Result};
