use crate::completion::{EngineParams, FragmentStream, InferenceEngine};
use crate::error::{LlamaCppError, Result};
use llama_cpp::standard_sampler::StandardSampler;
use llama_cpp::{LlamaModel, LlamaParams, SessionParams};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};

/// llama.cpp through the `llama_cpp` bindings
#[derive(Debug, Default, Clone, Copy)]
pub struct LlamaEngine;

impl LlamaEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl InferenceEngine for LlamaEngine {
    fn complete(&self, params: &EngineParams, prompt: &str) -> Result<FragmentStream> {
        tracing::debug!(
            "Loading {} (n_gpu_layers={}, n_ctx={})",
            params.model_path.display(),
            params.n_gpu_layers,
            params.n_ctx
        );
        let quiet = OutputGuard::new(!params.verbose)?;

        let model_params = LlamaParams {
            n_gpu_layers: params.n_gpu_layers,
            ..Default::default()
        };
        let model = LlamaModel::load_from_file(&params.model_path, model_params).map_err(|e| {
            LlamaCppError::Engine(format!(
                "Failed to load model {}: {e}",
                params.model_path.display()
            ))
        })?;

        let session_params = SessionParams {
            n_ctx: params.n_ctx,
            ..Default::default()
        };
        let mut session = model
            .create_session(session_params)
            .map_err(|e| LlamaCppError::Engine(format!("Failed to create session: {e}")))?;

        session
            .advance_context(prompt)
            .map_err(|e| LlamaCppError::Engine(format!("Failed to evaluate prompt: {e}")))?;

        let handle = session
            .start_completing_with(StandardSampler::default(), params.max_tokens)
            .map_err(|e| LlamaCppError::Engine(format!("Failed to start completion: {e}")))?;

        Ok(Box::new(LlamaFragments {
            pieces: handle.into_strings(),
            _quiet: quiet,
        }))
    }

    fn engine_name(&self) -> &str {
        "llama.cpp"
    }
}

/// Token pieces from a running completion. The generator thread stops once this is dropped.
struct LlamaFragments<I> {
    pieces: I,
    _quiet: OutputGuard,
}

impl<I: Iterator<Item = String>> Iterator for LlamaFragments<I> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pieces.next().map(Ok)
    }
}

/// Sends stderr to the null device until dropped.
///
/// llama.cpp writes its load and timing diagnostics straight to file
/// descriptor 2, so this works below Rust's own `stderr` handle.
#[derive(Debug)]
pub struct OutputGuard {
    saved: Option<RawFd>,
}

impl OutputGuard {
    /// Redirect stderr when `suppress` is true; otherwise a no-op guard
    pub fn new(suppress: bool) -> Result<Self> {
        if !suppress {
            return Ok(Self { saved: None });
        }

        let stderr_fd = std::io::stderr().as_raw_fd();
        let _ = std::io::stderr().flush();

        let devnull = OpenOptions::new().write(true).open("/dev/null")?;
        let saved = nix::unistd::dup(stderr_fd).map_err(std::io::Error::from)?;
        if let Err(e) = nix::unistd::dup2(devnull.as_raw_fd(), stderr_fd) {
            let _ = nix::unistd::close(saved);
            return Err(std::io::Error::from(e).into());
        }

        Ok(Self { saved: Some(saved) })
    }

    #[cfg(test)]
    const fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            let stderr_fd = std::io::stderr().as_raw_fd();
            if nix::unistd::dup2(saved, stderr_fd).is_err() {
                tracing::warn!("Failed to restore stderr after completion");
            }
            let _ = nix::unistd::close(saved);
        }
    }
}
