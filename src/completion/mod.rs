//! Runs a prompt against a registered model.
//!
//! [`CompletionAdapter`] turns a [`ModelEntry`] plus [`CompletionOptions`]
//! into [`EngineParams`], applies the entry's [`PromptTemplate`], and hands
//! back a [`Completion`]: a lazy sequence of text fragments. Fragments are
//! yielded as the engine produces them. Dropping a `Completion` early
//! releases the engine's generator.

pub mod llama;
pub mod prompt;

use crate::config::schema::PromptDefaults;
use crate::error::Result;
use crate::models::registry::ModelEntry;
use std::path::PathBuf;

pub use llama::{LlamaEngine, OutputGuard};
pub use prompt::PromptTemplate;

/// Text fragments produced by an engine, in order
pub type FragmentStream = Box<dyn Iterator<Item = Result<String>>>;

/// Unified interface for inference engines
pub trait InferenceEngine: Send + Sync {
    /// Start generating a completion for an already-templated prompt
    ///
    /// Returns once generation has started; the text arrives through the stream.
    fn complete(&self, params: &EngineParams, prompt: &str) -> Result<FragmentStream>;

    /// Get engine name for logging/debugging
    fn engine_name(&self) -> &str;
}

/// Prompt options as accepted from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Let the engine print its own diagnostics
    pub verbose: bool,
    pub max_tokens: usize,
    /// Keep every layer on the CPU, overriding `n_gpu_layers`
    pub no_gpu: bool,
    pub n_gpu_layers: u32,
    pub n_ctx: u32,
    /// System prompt for chat-mode models
    pub system: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::from(&PromptDefaults::default())
    }
}

impl From<&PromptDefaults> for CompletionOptions {
    fn from(defaults: &PromptDefaults) -> Self {
        Self {
            verbose: false,
            max_tokens: defaults.max_tokens,
            no_gpu: false,
            n_gpu_layers: defaults.n_gpu_layers,
            n_ctx: defaults.n_ctx,
            system: None,
        }
    }
}

/// Parameters in the engine's terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParams {
    pub model_path: PathBuf,
    pub n_ctx: u32,
    pub n_gpu_layers: u32,
    pub max_tokens: usize,
    pub verbose: bool,
}

impl EngineParams {
    #[must_use]
    pub fn new(entry: &ModelEntry, options: &CompletionOptions) -> Self {
        Self {
            model_path: entry.path.clone(),
            n_ctx: options.n_ctx,
            n_gpu_layers: if options.no_gpu { 0 } else { options.n_gpu_layers },
            max_tokens: options.max_tokens,
            verbose: options.verbose,
        }
    }
}

/// A streaming completion. Ends after the first error.
pub struct Completion {
    model_id: String,
    fragments: FragmentStream,
    emitted: usize,
    finished: bool,
}

impl Completion {
    #[must_use]
    pub fn new(model_id: impl Into<String>, fragments: FragmentStream) -> Self {
        Self {
            model_id: model_id.into(),
            fragments,
            emitted: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Drain the remaining fragments into one string
    pub fn into_text(self) -> Result<String> {
        self.collect()
    }
}

impl Iterator for Completion {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.fragments.next() {
            Some(Ok(fragment)) => {
                self.emitted += 1;
                Some(Ok(fragment))
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                tracing::debug!(
                    "Completion for '{}' finished after {} fragment(s)",
                    self.model_id,
                    self.emitted
                );
                None
            }
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                "Completion for '{}' stopped early after {} fragment(s)",
                self.model_id,
                self.emitted
            );
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("model_id", &self.model_id)
            .field("emitted", &self.emitted)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Maps registry entries and prompt options onto an [`InferenceEngine`]
#[derive(Debug, Default)]
pub struct CompletionAdapter<E> {
    engine: E,
}

impl<E: InferenceEngine> CompletionAdapter<E> {
    pub const fn new(engine: E) -> Self {
        Self { engine }
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Start a completion. Engine failures are returned as-is, never retried.
    pub fn run(
        &self,
        entry: &ModelEntry,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion> {
        let template = PromptTemplate::for_entry(entry);
        let text = template.render(prompt, options.system.as_deref());
        let params = EngineParams::new(entry, options);

        tracing::info!(
            model = %entry.id,
            engine = self.engine.engine_name(),
            ?template,
            n_ctx = params.n_ctx,
            n_gpu_layers = params.n_gpu_layers,
            max_tokens = params.max_tokens,
            "Starting completion"
        );

        let fragments = self.engine.complete(&params, &text)?;
        Ok(Completion::new(entry.id.clone(), fragments))
    }
}
