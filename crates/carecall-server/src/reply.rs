//! Reply generation for calls and chat.
//!
//! The generator is opaque to the rest of the server: it receives the
//! conversation so far and returns the text to speak or send. Tool calling
//! (calendar search, booking) happens behind the endpoint, which reports found
//! events back through the session API.

use crate::config::ReplyConfig;
use async_trait::async_trait;
use carecall_types::ChatTurn;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

/// Errors from the reply generator.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply request failed: {0}")]
    Request(String),

    #[error("reply generator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed reply response: {0}")]
    Malformed(String),

    #[error("reply generator returned no text")]
    Empty,

    #[error("reply generation timed out after {0}ms")]
    Timeout(u64),
}

/// Produces the agent's next message for a conversation.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, session_id: &str, history: &[ChatTurn]) -> Result<String, ReplyError>;
}

/// Runs `generator` under the configured timeout.
pub async fn generate_with_timeout(
    generator: &dyn ReplyGenerator,
    config: &ReplyConfig,
    session_id: &str,
    history: &[ChatTurn],
) -> Result<String, ReplyError> {
    match tokio::time::timeout(config.timeout(), generator.generate_reply(session_id, history)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(ReplyError::Empty),
        Ok(Ok(text)) => Ok(text.trim().to_string()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ReplyError::Timeout(config.timeout_ms)),
    }
}

/// Calls an OpenAI-compatible chat-completions endpoint.
pub struct ChatCompletionsGenerator {
    config: ReplyConfig,
    client: reqwest::Client,
}

impl ChatCompletionsGenerator {
    pub fn new(config: ReplyConfig) -> Result<Self, ReplyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ReplyError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Builds the request body from the most recent turns.
    pub fn request_body(&self, history: &[ChatTurn]) -> Value {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(json!({ "role": "system", "content": prompt }));
        }
        let skip = history.len().saturating_sub(self.config.max_history_turns);
        for turn in &history[skip..] {
            messages.push(json!({ "role": turn.role.as_str(), "content": turn.content }));
        }
        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
        })
    }
}

/// Extracts `choices[0].message.content` from a chat-completions response.
fn parse_completion(data: &Value) -> Result<String, ReplyError> {
    let choices = data
        .get("choices")
        .and_then(Value::as_array)
        .ok_or_else(|| ReplyError::Malformed("missing choices".to_string()))?;
    let first = choices
        .first()
        .ok_or_else(|| ReplyError::Malformed("empty choices".to_string()))?;
    let content = first
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();
    if content.is_empty() {
        return Err(ReplyError::Empty);
    }
    Ok(content.to_string())
}

#[async_trait]
impl ReplyGenerator for ChatCompletionsGenerator {
    async fn generate_reply(&self, session_id: &str, history: &[ChatTurn]) -> Result<String, ReplyError> {
        let body = self.request_body(history);
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request.send().await.map_err(|e| {
            warn!(session_id, "reply request failed: {}", e);
            if e.is_timeout() {
                ReplyError::Timeout(self.config.timeout_ms)
            } else {
                ReplyError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ReplyError::Request(format!("failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(ReplyError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let data: Value =
            serde_json::from_str(&text).map_err(|e| ReplyError::Malformed(e.to_string()))?;
        parse_completion(&data)
    }
}
