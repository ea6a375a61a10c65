//! Generation backend: the text oracle the agents think and act through.
//!
//! Two wire flavors are supported behind one client: Anthropic-style
//! (`/v1/messages`, `x-api-key`) and OpenAI-style chat completions
//! (`/v1/chat/completions`, bearer token). The backend choice string selects
//! the flavor plus a default base URL and key environment variable.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Errors from the generation backend. Fatal to the current turn only,
/// except [`BackendError::UnknownChoice`] which aborts construction.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown backend choice: {0}")]
    UnknownChoice(String),
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("backend reply contained no usable text")]
    EmptyReply,
    #[error("could not read a channel choice from reply: {0:?}")]
    Channel(String),
}

/// The five action channels a turn can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Message,
    Email,
    Command,
    Pass,
    Ignore,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Message,
        Channel::Email,
        Channel::Command,
        Channel::Pass,
        Channel::Ignore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Message => "message",
            Channel::Email => "email",
            Channel::Command => "command",
            Channel::Pass => "pass",
            Channel::Ignore => "ignore",
        }
    }

    /// Scan free text for the first channel keyword, case-insensitively.
    pub fn from_reply(text: &str) -> Option<Channel> {
        let lower = text.to_lowercase();
        Channel::ALL
            .iter()
            .filter_map(|c| lower.find(c.as_str()).map(|pos| (pos, *c)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, c)| c)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response text oracle consumed by think, act, and classify calls.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String, BackendError>;

    /// Ask the backend to pick one of the five channels for the given context.
    async fn classify_channel(&self, context: &str) -> Result<Channel, BackendError> {
        let user = format!(
            "{}\n\nAnswer with exactly one word out of: message, email, command, pass, ignore.",
            context
        );
        let reply = self
            .generate("You route workplace actions to their channel.", &user)
            .await?;
        Channel::from_reply(&reply).ok_or_else(|| BackendError::Channel(reply))
    }
}

/// Wire format spoken by [`HttpBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    Anthropic,
    OpenAi,
}

/// Static description of a backend choice.
struct ChoiceInfo {
    flavor: ApiFlavor,
    base_url: &'static str,
    default_model: &'static str,
    key_env: Option<&'static str>,
}

fn choice_info(choice: &str) -> Result<ChoiceInfo, BackendError> {
    match choice {
        "anthropic" | "claude" => Ok(ChoiceInfo {
            flavor: ApiFlavor::Anthropic,
            base_url: "https://api.anthropic.com",
            default_model: "claude-3-5-haiku-latest",
            key_env: Some("ANTHROPIC_API_KEY"),
        }),
        "openai" => Ok(ChoiceInfo {
            flavor: ApiFlavor::OpenAi,
            base_url: "https://api.openai.com",
            default_model: "gpt-4o-mini",
            key_env: Some("OPENAI_API_KEY"),
        }),
        "groq" => Ok(ChoiceInfo {
            flavor: ApiFlavor::OpenAi,
            base_url: "https://api.groq.com/openai",
            default_model: "llama-3.3-70b-versatile",
            key_env: Some("GROQ_API_KEY"),
        }),
        "ollama" => Ok(ChoiceInfo {
            flavor: ApiFlavor::OpenAi,
            base_url: "http://localhost:11434",
            default_model: "mistral",
            key_env: None,
        }),
        other => Err(BackendError::UnknownChoice(other.to_string())),
    }
}

// Anthropic-style wire types.

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

// OpenAI-style wire types.

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

const MAX_TOKENS: u32 = 1024;

/// HTTP generation backend.
pub struct HttpBackend {
    client: Client,
    flavor: ApiFlavor,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpBackend {
    /// Build a backend for the given choice string. The API key is read from
    /// the choice's environment variable; an unknown choice or a missing key
    /// is a construction-time error.
    pub fn from_choice(
        choice: &str,
        base_url: Option<&str>,
        model: Option<&str>,
    ) -> Result<Self, BackendError> {
        let info = choice_info(choice)?;
        let api_key = match info.key_env {
            Some(env) => std::env::var(env).map_err(|_| BackendError::MissingApiKey(env))?,
            None => String::new(),
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(Self {
            client,
            flavor: info.flavor,
            base_url: base_url
                .unwrap_or(info.base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or(info.default_model).to_string(),
        })
    }

    fn api_error(status: u16, body: &str) -> BackendError {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .ok()
            .and_then(|e| e.error.and_then(|d| d.message))
            .unwrap_or_else(|| body.chars().take(200).collect());
        BackendError::Api { status, message }
    }

    async fn generate_anthropic(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: system.to_string(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::api_error(status.as_u16(), &body));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| BackendError::Request(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            info!(
                model = %self.model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "backend response received"
            );
        }
        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(BackendError::EmptyReply);
        }
        Ok(text)
    }

    async fn generate_openai(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            messages: vec![
                WireMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                WireMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::api_error(status.as_u16(), &body));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| BackendError::Request(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(BackendError::EmptyReply);
        }
        Ok(text)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, BackendError> {
        info!(model = %self.model, prompt_len = user.len(), "sending backend request");
        match self.flavor {
            ApiFlavor::Anthropic => self.generate_anthropic(system, user).await,
            ApiFlavor::OpenAi => self.generate_openai(system, user).await,
        }
    }
}
