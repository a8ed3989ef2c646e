use super::client_types::{ChatCompletionResponse, ChatErrorResponse, Choice, ChoiceMessage};
use super::upstream_types::UpstreamChatResponse;
use crate::error::ProxyError;

/// Translate an upstream response into a client Chat Completions response.
/// Pure function: `client_model` is what the client originally requested.
pub fn upstream_to_client(resp: &UpstreamChatResponse, client_model: &str) -> ChatCompletionResponse {
    let mut choices: Vec<Choice> = resp
        .choices
        .iter()
        .map(|c| {
            let message = c.message.clone().unwrap_or_default();
            Choice {
                index: c.index,
                message: ChoiceMessage {
                    role: message.role.unwrap_or_else(|| "assistant".to_string()),
                    content: message.content,
                    tool_calls: message.tool_calls,
                },
                finish_reason: Some(
                    c.finish_reason
                        .clone()
                        .unwrap_or_else(|| "stop".to_string()),
                ),
            }
        })
        .collect();

    // Reduced `{"text": ...}` shape: one assistant choice.
    if choices.is_empty() {
        choices.push(Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(resp.text.clone().unwrap_or_default()),
                tool_calls: None,
            },
            finish_reason: Some(
                resp.finish_reason
                    .clone()
                    .unwrap_or_else(|| "stop".to_string()),
            ),
        });
    }

    let id = resp
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map_or_else(new_completion_id, str::to_string);

    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: resp
            .created
            .filter(|c| *c > 0)
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: client_model.to_string(),
        choices,
        usage: resp.usage.clone(),
    }
}

pub(crate) fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Translate a proxy error into the Chat Completions error envelope.
pub fn error_to_client(err: &ProxyError) -> ChatErrorResponse {
    match err {
        ProxyError::InvalidRequest { message } => ChatErrorResponse::invalid_request(message),
        ProxyError::UpstreamAuth { status, message } => ChatErrorResponse::new(
            "authentication_error",
            format!(
                "Upstream rejected the proxy's credential (status {status}): {message}. \
                 The token has likely expired; restart the proxy with a fresh token."
            ),
            Some("upstream_credential_rejected".to_string()),
        ),
        ProxyError::Upstream { status, message } => ChatErrorResponse::new(
            "upstream_error",
            message.clone(),
            Some(status.to_string()),
        ),
        ProxyError::Timeout { message } => {
            ChatErrorResponse::new("timeout_error", format!("Upstream timed out: {message}"), None)
        }
        ProxyError::Transport { .. } | ProxyError::Http(_) => ChatErrorResponse::new(
            "upstream_connection_error",
            err.to_string(),
            None,
        ),
        ProxyError::Translation { message } => {
            ChatErrorResponse::new("upstream_error", message.clone(), None)
        }
        _ => ChatErrorResponse::server_error("Internal proxy error"),
    }
}
