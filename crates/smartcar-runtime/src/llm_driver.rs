//! [`LlmDriver`] – OpenAI-compatible language query client.
//!
//! Talks to a locally-running model server exposing `/v1/chat/completions`,
//! such as [Ollama](https://ollama.com) (`http://localhost:11434`) serving
//! `deepseek-r1:1.5b`.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use smartcar_runtime::llm_driver::{LanguageQuery, LlmDriver};
//!
//! # async fn demo() {
//! let driver = LlmDriver::new("http://localhost:11434", "deepseek-r1:1.5b");
//! // Requires a running model server.
//! let reply = driver.query("What can you see?", Duration::from_secs(10)).await;
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smartcar_types::CarError;
use thiserror::Error;
use tracing::{debug, warn};

/// A free-form question answered by a language model.
#[async_trait]
pub trait LanguageQuery: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CarError::QueryTimeout`] when no answer arrives within
    /// `timeout`, or [`CarError::QueryFailed`] when the service errors.
    async fn query(&self, text: &str, timeout: Duration) -> Result<String, CarError>;
}

/// Persona given to the model so replies are short enough to speak aloud.
pub const SYSTEM_PROMPT: &str = "\
You are the voice assistant of a small four-wheeled robot car with a camera. \
Answer in one or two short sentences suitable for text-to-speech. \
Do not use markdown, lists, or emoji.";

/// Errors from the HTTP exchange with the model server.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<LlmError> for CarError {
    fn from(e: LlmError) -> Self {
        CarError::QueryFailed(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Async client for an OpenAI-compatible chat-completions endpoint.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmDriver {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `key` as a bearer token. An empty key disables authentication.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Send `messages` and return the assistant's reply.
    ///
    /// # Errors
    ///
    /// [`LlmError::Http`] if the request fails, [`LlmError::BadResponse`] if
    /// the reply has no choices.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

#[async_trait]
impl LanguageQuery for LlmDriver {
    async fn query(&self, text: &str, timeout: Duration) -> Result<String, CarError> {
        let messages = prompt(text);
        debug!(model = %self.model, "language query");
        let reply = tokio::time::timeout(timeout, self.complete(&messages))
            .await
            .map_err(|_| {
                warn!(timeout_secs = timeout.as_secs(), "language query timed out");
                CarError::QueryTimeout(timeout)
            })??;
        let reply = strip_reasoning(&reply);
        if reply.is_empty() {
            return Err(LlmError::BadResponse("empty reply".into()).into());
        }
        Ok(reply)
    }
}

fn prompt(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: Role::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: Role::User,
            content: text.to_string(),
        },
    ]
}

/// Drop `<think>…</think>` blocks emitted by reasoning models; only the
/// answer is spoken.
pub fn strip_reasoning(reply: &str) -> String {
    let mut out = String::with_capacity(reply.len());
    let mut rest = reply;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}
