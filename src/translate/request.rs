//! Translate client Chat Completions requests into upstream deployment requests.
//!
//! The reshape is lossless: messages are copied in order with their content
//! untouched, and every generation parameter (known or not) is forwarded.
//! Only `model` moves, out of the body and into the deployment path segment.

use std::collections::HashMap;
use std::hash::BuildHasher;

use super::client_types::ChatCompletionRequest;
use super::upstream_types::{UpstreamChatRequest, UpstreamRequest};
use crate::error::{ProxyError, Result};

/// Parse an inbound body. Missing `model` / `messages` or malformed JSON is a client error.
pub fn parse_client_request(body: &[u8]) -> Result<ChatCompletionRequest> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::invalid_request(format!("Invalid request body: {e}")))
}

/// Translate a client request into an upstream request.
/// Pure function: takes the request + deployment mapping, returns the translated request.
pub fn client_to_upstream<S: BuildHasher>(
    req: &ChatCompletionRequest,
    deployments: &HashMap<String, String, S>,
) -> Result<UpstreamRequest> {
    validate(req)?;

    let deployment = deployments
        .get(&req.model)
        .cloned()
        .unwrap_or_else(|| req.model.clone());

    if !is_valid_deployment(&deployment) {
        return Err(ProxyError::invalid_request(format!(
            "Model '{}' does not name a valid deployment identifier",
            req.model
        )));
    }

    let body = UpstreamChatRequest {
        messages: req.messages.clone(),
        stream: req.stream,
        stream_options: req.stream_options.clone(),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_tokens,
        max_completion_tokens: req.max_completion_tokens,
        stop: req.stop.clone(),
        presence_penalty: req.presence_penalty,
        frequency_penalty: req.frequency_penalty,
        n: req.n,
        seed: req.seed,
        user: req.user.clone(),
        extra: req.extra.clone(),
    };

    Ok(UpstreamRequest {
        deployment,
        client_model: req.model.clone(),
        body,
    })
}

fn validate(req: &ChatCompletionRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(ProxyError::invalid_request("Field `model` must not be empty"));
    }
    if req.messages.is_empty() {
        return Err(ProxyError::invalid_request(
            "Field `messages` must contain at least one message",
        ));
    }
    if let Some(pos) = req.messages.iter().position(|m| m.role.trim().is_empty()) {
        return Err(ProxyError::invalid_request(format!(
            "Message at index {pos} has an empty `role`"
        )));
    }
    Ok(())
}

// The deployment becomes a URL path segment.
fn is_valid_deployment(deployment: &str) -> bool {
    !deployment.is_empty()
        && deployment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::client_types::{ChatContent, ChatMessage};

    fn request(model: &str, messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: None,
            stream_options: None,
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(64),
            max_completion_tokens: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            n: None,
            seed: None,
            user: None,
            extra: HashMap::default(),
        }
    }

    #[test]
    fn test_messages_preserved_in_order() {
        let messages = vec![
            ChatMessage::text("system", "Be brief."),
            ChatMessage::text("user", "Hello"),
            ChatMessage::text("assistant", "Hi!"),
            ChatMessage::text("user", "How are you?"),
        ];
        let req = request("gpt-4.1-nano", messages.clone());

        let result = client_to_upstream(&req, &HashMap::new()).unwrap();

        assert_eq!(result.body.messages, messages);
        assert_eq!(result.body.temperature, Some(0.2));
        assert_eq!(result.body.max_tokens, Some(64));
    }

    #[test]
    fn test_unmapped_model_is_the_deployment() {
        let req = request("gpt-4.1-nano", vec![ChatMessage::text("user", "hi")]);
        let result = client_to_upstream(&req, &HashMap::new()).unwrap();
        assert_eq!(result.deployment, "gpt-4.1-nano");
        assert_eq!(result.client_model, "gpt-4.1-nano");
    }

    #[test]
    fn test_mapped_model_uses_configured_deployment() {
        let mut deployments = HashMap::new();
        deployments.insert("gpt-4o".to_string(), "prod-gpt4o-eastus".to_string());

        let req = request("gpt-4o", vec![ChatMessage::text("user", "hi")]);
        let result = client_to_upstream(&req, &deployments).unwrap();

        assert_eq!(result.deployment, "prod-gpt4o-eastus");
        assert_eq!(result.client_model, "gpt-4o");
    }

    #[test]
    fn test_unknown_fields_and_multipart_content_survive() {
        let raw = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "What is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]
            }],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {}}}],
            "logit_bias": {"50256": -100}
        });
        let req = parse_client_request(raw.to_string().as_bytes()).unwrap();
        let result = client_to_upstream(&req, &HashMap::new()).unwrap();

        let body = serde_json::to_value(&result.body).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["messages"], raw["messages"]);
        assert_eq!(body["tools"], raw["tools"]);
        assert_eq!(body["logit_bias"], raw["logit_bias"]);
        assert!(matches!(
            result.body.messages[0].content,
            Some(ChatContent::Parts(ref parts)) if parts.len() == 2
        ));
    }

    #[test]
    fn test_missing_model_is_client_error() {
        let err = parse_client_request(br#"{"messages":[{"role":"user","content":"Hello"}]}"#)
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn test_missing_messages_is_client_error() {
        let err = parse_client_request(br#"{"model":"gpt-4.1-nano"}"#).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("messages"));
    }

    #[test]
    fn test_malformed_json_is_client_error() {
        let err = parse_client_request(b"{not json").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_empty_model_and_messages_rejected() {
        let req = request("  ", vec![ChatMessage::text("user", "hi")]);
        assert!(client_to_upstream(&req, &HashMap::new())
            .unwrap_err()
            .is_client_error());

        let req = request("gpt-4o", Vec::new());
        assert!(client_to_upstream(&req, &HashMap::new())
            .unwrap_err()
            .is_client_error());
    }

    #[test]
    fn test_path_unsafe_model_rejected() {
        let req = request("../admin?x=1", vec![ChatMessage::text("user", "hi")]);
        let err = client_to_upstream(&req, &HashMap::new()).unwrap_err();
        assert!(err.is_client_error());
    }
}
