//! Type definitions for the deployment-addressed upstream chat service.
//!
//! The upstream takes the deployment in the URL rather than a `model` field,
//! and answers either in the chat-completion shape or in the reduced
//! `{"text": "..."}` shape. Both are accepted, for full bodies and for stream chunks.

use super::client_types::{ChatMessage, ChatUsage, StopSequences};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Request types (what we send TO the upstream)
// ---------------------------------------------------------------------------

/// A translated request: where to send it plus the body to send.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Deployment identifier embedded in the outbound URL path.
    pub deployment: String,
    /// The model name the client asked for, echoed back in responses.
    pub client_model: String,
    pub body: UpstreamChatRequest,
}

impl UpstreamRequest {
    pub fn is_streaming(&self) -> bool {
        self.body.stream.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Response types (what we receive FROM the upstream)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub choices: Vec<UpstreamChoice>,
    /// Reduced shape: the whole completion as one string.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    /// Some upstreams report failures (content filter, quota) in a 200 body.
    #[serde(default)]
    pub error: Option<UpstreamErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<UpstreamMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Streaming chunk types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<UpstreamChunkChoice>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    /// Set when the upstream reports a failure inside an open stream.
    #[serde(default)]
    pub error: Option<UpstreamErrorDetail>,
}

impl UpstreamChunk {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

/// A whole completion delivered where a stream was expected becomes one chunk.
impl From<UpstreamChatResponse> for UpstreamChunk {
    fn from(resp: UpstreamChatResponse) -> Self {
        let choices = resp
            .choices
            .into_iter()
            .map(|c| {
                let message = c.message.unwrap_or_default();
                UpstreamChunkChoice {
                    index: c.index,
                    delta: Some(UpstreamDelta {
                        role: message.role,
                        content: message.content,
                        tool_calls: message.tool_calls,
                    }),
                    finish_reason: c.finish_reason,
                }
            })
            .collect();

        Self {
            id: resp.id,
            choices,
            text: resp.text,
            finish_reason: resp.finish_reason,
            usage: resp.usage,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Option<UpstreamDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(default)]
    pub error: Option<UpstreamErrorDetail>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl UpstreamErrorDetail {
    pub fn describe(&self) -> String {
        let code = self.code.as_ref().map(|c| match c {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        match (&self.message, code) {
            (Some(msg), Some(code)) => format!("{msg} (code {code})"),
            (Some(msg), None) => msg.clone(),
            (None, Some(code)) => format!("code {code}"),
            (None, None) => "unknown upstream error".to_string(),
        }
    }
}

/// Best-effort extraction of a human-readable message from an upstream error body.
pub fn upstream_error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<UpstreamErrorBody>(body) {
        if let Some(detail) = parsed.error {
            return detail.describe();
        }
        if let Some(message) = parsed.message {
            return message;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        truncate(trimmed, 500).to_string()
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
