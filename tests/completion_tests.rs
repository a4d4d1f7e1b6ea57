use llm_llama_cpp::completion::prompt::DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT;
use llm_llama_cpp::completion::{
    CompletionAdapter, CompletionOptions, EngineParams, FragmentStream, InferenceEngine,
};
use llm_llama_cpp::models::ModelEntry;
use llm_llama_cpp::{LlamaCppError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Replays canned fragments and records what it was asked to do
#[derive(Default)]
struct ScriptedEngine {
    fragments: Vec<String>,
    fail_with: Option<String>,
    seen: Mutex<Vec<(EngineParams, String)>>,
    pulled: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl ScriptedEngine {
    fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        }
    }

    fn last_call(&self) -> (EngineParams, String) {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

struct Tracked {
    inner: std::vec::IntoIter<String>,
    pulled: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl Iterator for Tracked {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;
        self.pulled.fetch_add(1, Ordering::SeqCst);
        Some(Ok(next))
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl InferenceEngine for ScriptedEngine {
    fn complete(&self, params: &EngineParams, prompt: &str) -> Result<FragmentStream> {
        self.seen
            .lock()
            .unwrap()
            .push((params.clone(), prompt.to_string()));

        if let Some(message) = &self.fail_with {
            return Err(LlamaCppError::Engine(message.clone()));
        }

        Ok(Box::new(Tracked {
            inner: self.fragments.clone().into_iter(),
            pulled: Arc::clone(&self.pulled),
            released: Arc::clone(&self.released),
        }))
    }

    fn engine_name(&self) -> &str {
        "scripted"
    }
}

fn entry(chat_mode: bool) -> ModelEntry {
    ModelEntry {
        id: "llama-2-7b-chat".to_string(),
        path: PathBuf::from("/m/llama-2-7b-chat.gguf"),
        aliases: vec!["l2c".to_string()],
        chat_mode,
        extra: Default::default(),
    }
}

#[test]
fn test_raw_prompt_passed_through() {
    let adapter = CompletionAdapter::new(ScriptedEngine::new(&["Hel", "lo", "!"]));

    let text = adapter
        .run(&entry(false), "Say hello", &CompletionOptions::default())
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "Hello!");

    let (params, prompt) = adapter.engine().last_call();
    assert_eq!(prompt, "Say hello");
    assert_eq!(params.model_path, PathBuf::from("/m/llama-2-7b-chat.gguf"));
    assert_eq!(params.n_ctx, 4000);
    assert_eq!(params.n_gpu_layers, 1);
    assert_eq!(params.max_tokens, 4000);
    assert!(!params.verbose);
}

#[test]
fn test_chat_mode_applies_template() {
    let adapter = CompletionAdapter::new(ScriptedEngine::new(&["ok"]));

    adapter
        .run(&entry(true), "Name a llama", &CompletionOptions::default())
        .unwrap()
        .into_text()
        .unwrap();
    let (_, prompt) = adapter.engine().last_call();
    assert!(prompt.starts_with("<s>[INST] <<SYS>>\n"));
    assert!(prompt.contains(DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT));
    assert!(prompt.ends_with("Name a llama [/INST] "));

    let options = CompletionOptions {
        system: Some("Answer in French".to_string()),
        ..CompletionOptions::default()
    };
    adapter
        .run(&entry(true), "Name a llama", &options)
        .unwrap()
        .into_text()
        .unwrap();
    let (_, prompt) = adapter.engine().last_call();
    assert!(prompt.contains("<<SYS>>\nAnswer in French\n<</SYS>>"));
    assert!(!prompt.contains(DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT));
}

#[test]
fn test_no_gpu_forces_cpu() {
    let adapter = CompletionAdapter::new(ScriptedEngine::new(&[]));
    let options = CompletionOptions {
        no_gpu: true,
        n_gpu_layers: 40,
        n_ctx: 1024,
        max_tokens: 32,
        verbose: true,
        ..CompletionOptions::default()
    };

    let text = adapter.run(&entry(false), "hi", &options).unwrap().into_text().unwrap();
    assert!(text.is_empty());

    let (params, _) = adapter.engine().last_call();
    assert_eq!(params.n_gpu_layers, 0);
    assert_eq!(params.n_ctx, 1024);
    assert_eq!(params.max_tokens, 32);
    assert!(params.verbose);
}

#[test]
fn test_fragments_are_pulled_lazily() {
    let engine = ScriptedEngine::new(&["a", "b", "c", "d"]);
    let pulled = Arc::clone(&engine.pulled);
    let released = Arc::clone(&engine.released);
    let adapter = CompletionAdapter::new(engine);

    let mut completion = adapter
        .run(&entry(false), "go", &CompletionOptions::default())
        .unwrap();
    assert_eq!(completion.model_id(), "llama-2-7b-chat");
    assert_eq!(pulled.load(Ordering::SeqCst), 0);

    assert_eq!(completion.next().unwrap().unwrap(), "a");
    assert_eq!(pulled.load(Ordering::SeqCst), 1);

    // Consumer stops early: the engine side must be released without draining
    drop(completion);
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(pulled.load(Ordering::SeqCst), 1);
}

#[test]
fn test_engine_failure_propagates() {
    let engine = ScriptedEngine {
        fail_with: Some("failed to load model".to_string()),
        ..ScriptedEngine::default()
    };
    let adapter = CompletionAdapter::new(engine);

    let err = adapter
        .run(&entry(false), "hi", &CompletionOptions::default())
        .unwrap_err();
    assert!(matches!(err, LlamaCppError::Engine(ref m) if m == "failed to load model"));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(adapter.engine().seen.lock().unwrap().len(), 1);
}
