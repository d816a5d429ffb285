use std::path::Path;

use minijinja::{context, Environment};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::ChatMessage;

/// Sampling parameters for one generation run. Sampling is always on; there
/// is no greedy path.
#[derive(Debug, Clone, Copy)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
    pub max_new_tokens: usize,
}

/// Chat template shipped by the model in its `tokenizer_config.json`,
/// together with the special-token strings templates commonly reference.
/// The gateway brings the render engine, never the template text.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    source: String,
    bos_token: Option<String>,
    eos_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenizerConfig {
    chat_template: Option<String>,
    #[serde(default)]
    bos_token: Option<TokenRef>,
    #[serde(default)]
    eos_token: Option<TokenRef>,
}

/// Special tokens appear either as plain strings or as added-token maps.
#[derive(Deserialize)]
#[serde(untagged)]
enum TokenRef {
    Plain(String),
    Added { content: String },
}

impl TokenRef {
    fn into_content(self) -> String {
        match self {
            TokenRef::Plain(content) => content,
            TokenRef::Added { content } => content,
        }
    }
}

impl ChatTemplate {
    /// Reads a `tokenizer_config.json`. `Ok(None)` when the file or its
    /// `chat_template` field is absent; template syntax errors only surface
    /// at render time.
    pub fn from_tokenizer_config(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ModelLoad(format!(
                "tokenizer config read failed '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TokenizerConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::ModelLoad(format!(
                "tokenizer config parse failed '{}': {}",
                path.display(),
                e
            ))
        })?;

        Ok(config.chat_template.map(|source| Self {
            source,
            bos_token: config.bos_token.map(TokenRef::into_content),
            eos_token: config.eos_token.map(TokenRef::into_content),
        }))
    }

    /// Template straight from Jinja source, for exercising render behavior
    /// without a tokenizer config on disk.
    #[cfg(test)]
    pub(crate) fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bos_token: None,
            eos_token: None,
        }
    }

    /// Renders the conversation exactly the way the model's own template
    /// dictates, with the generation prompt appended and thinking markup
    /// disabled.
    pub fn render(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut env = Environment::new();
        // Stock templates call python string methods like split/startswith.
        env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
        env.add_function(
            "raise_exception",
            |message: String| -> std::result::Result<String, minijinja::Error> {
                Err(minijinja::Error::new(
                    minijinja::ErrorKind::InvalidOperation,
                    message,
                ))
            },
        );

        let template = env
            .template_from_str(&self.source)
            .map_err(|e| Error::Template(format!("chat template compile failed: {}", e)))?;

        template
            .render(context! {
                messages => messages,
                add_generation_prompt => true,
                enable_thinking => false,
                bos_token => self.bos_token.as_deref().unwrap_or(""),
                eos_token => self.eos_token.as_deref().unwrap_or(""),
            })
            .map_err(|e| Error::Template(format!("chat template render failed: {}", e)))
    }
}

/// Final turn list for the compiler: the gateway-level system prompt becomes
/// a leading system turn only when non-empty; caller turns pass through
/// untouched, including any system turns they already contain.
pub fn assemble_turns(turns: &[ChatMessage], system_prompt: &str) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(turns.len() + 1);
    if !system_prompt.is_empty() {
        out.push(ChatMessage::new("system", system_prompt));
    }
    out.extend_from_slice(turns);
    out
}
