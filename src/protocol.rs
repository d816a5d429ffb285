use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS: usize = 8192;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_MODEL: &str = "deepseek";

/// One conversation turn as it appears on the wire and inside the prompt
/// compiler. Roles are free-form strings; the chat template decides what to
/// do with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/chat/completions`. Every field except `messages` is
/// optional and falls back to the documented default.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

/// Token accounting is not populated; the object stays empty on the wire so
/// clients that read `usage` keep working.
#[derive(Debug, Serialize)]
pub struct Usage {}

impl CompletionResponse {
    pub fn new(content: String, finish_reason: FinishReason) -> Self {
        Self {
            choices: vec![Choice {
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason,
            }],
            usage: Usage {},
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

/// Error body for failed completions. Mirrors the `detail` shape the
/// frontend already consumes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
