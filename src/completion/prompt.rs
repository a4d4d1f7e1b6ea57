use crate::models::registry::ModelEntry;

/// System prompt used in chat mode when none is given
pub const DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT: &str = "You are a helpful, respectful and honest assistant. Always answer as helpfully as possible, while being safe.  Your answers should not include any harmful, unethical, racist, sexist, toxic, dangerous, or illegal content. Please ensure that your responses are socially unbiased and positive in nature.

If a question does not make any sense, or is not factually coherent, explain why instead of answering something not correct. If you don't know the answer to a question, please don't share false information.";

/// How a user prompt is turned into the text the engine sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Plain completion; the prompt is passed through untouched
    Raw,
    /// `<s>[INST] <<SYS>> ... <</SYS>> ... [/INST]` wrapping
    Llama2Chat,
}

impl PromptTemplate {
    #[must_use]
    pub const fn for_entry(entry: &ModelEntry) -> Self {
        if entry.chat_mode {
            Self::Llama2Chat
        } else {
            Self::Raw
        }
    }

    /// Build the effective prompt. `system` only applies to chat mode.
    #[must_use]
    pub fn render(self, prompt: &str, system: Option<&str>) -> String {
        match self {
            Self::Raw => prompt.to_string(),
            Self::Llama2Chat => {
                let system = system.unwrap_or(DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT);
                format!("<s>[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{prompt} [/INST] ")
            }
        }
    }
}
