//! State machine for translating upstream stream chunks into client stream frames.
//!
//! The [`StreamTranslator`] processes [`UpstreamChunk`]s one at a time and emits at
//! most one client `chat.completion.chunk` per upstream chunk, so the client sees
//! the same sequence upstream produced. It then emits the `[DONE]` marker exactly once.

use super::client_types::{ChatCompletionChunk, ChatErrorResponse, ChunkChoice, ChunkDelta};
use super::response::{error_to_client, new_completion_id};
use super::upstream_types::UpstreamChunk;
use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingFirstChunk,
    Streaming,
    Terminated,
}

/// One unit written to the client event stream.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Chunk(ChatCompletionChunk),
    Error(ChatErrorResponse),
    Done,
}

impl StreamFrame {
    /// The `data:` payload for this frame.
    pub fn to_sse_data(&self) -> String {
        match self {
            Self::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            Self::Error(err) => serde_json::to_string(err).unwrap_or_default(),
            Self::Done => "[DONE]".to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Usage:
///   let mut translator = StreamTranslator::new("gpt-4.1-nano");
///   for chunk in upstream_chunks {
///       if let Some(frame) = translator.process_chunk(&chunk) { /* send */ }
///   }
///   let done = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    id: String,
    created: i64,
    state: StreamState,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            id: new_completion_id(),
            created: chrono::Utc::now().timestamp(),
            state: StreamState::AwaitingFirstChunk,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Translate one upstream chunk. Chunks carrying no text, tool call,
    /// finish reason, or usage (e.g. content-filter annotations) produce nothing.
    pub fn process_chunk(&mut self, chunk: &UpstreamChunk) -> Option<StreamFrame> {
        if self.state == StreamState::Terminated {
            return None;
        }

        let mut choices: Vec<ChunkChoice> = chunk
            .choices
            .iter()
            .filter_map(|c| {
                let delta = c.delta.clone().unwrap_or_default();
                let has_payload = delta.content.as_deref().is_some_and(|s| !s.is_empty())
                    || delta.tool_calls.is_some()
                    || c.finish_reason.is_some();
                has_payload.then(|| ChunkChoice {
                    index: c.index,
                    delta: ChunkDelta {
                        role: delta.role,
                        content: delta.content,
                        tool_calls: delta.tool_calls,
                    },
                    finish_reason: c.finish_reason.clone(),
                })
            })
            .collect();

        if choices.is_empty() {
            let has_text = chunk.text.as_deref().is_some_and(|s| !s.is_empty());
            if has_text || chunk.finish_reason.is_some() {
                choices.push(ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        role: None,
                        content: chunk.text.clone(),
                        tool_calls: None,
                    },
                    finish_reason: chunk.finish_reason.clone(),
                });
            }
        }

        if choices.is_empty() && chunk.usage.is_none() {
            return None;
        }

        if self.state == StreamState::AwaitingFirstChunk {
            if let Some(id) = chunk.id.as_deref().filter(|id| !id.is_empty()) {
                self.id = id.to_string();
            }
            for choice in &mut choices {
                choice.delta.role.get_or_insert_with(|| "assistant".to_string());
            }
            self.state = StreamState::Streaming;
        }

        Some(StreamFrame::Chunk(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage: chunk.usage.clone(),
        }))
    }

    /// Call when upstream signals end-of-stream or closes the connection.
    pub fn finish(&mut self) -> Option<StreamFrame> {
        if self.state == StreamState::Terminated {
            return None;
        }
        self.state = StreamState::Terminated;
        Some(StreamFrame::Done)
    }

    /// Error path: report the failure in-band, then terminate the stream.
    pub fn fail(&mut self, err: &ProxyError) -> Vec<StreamFrame> {
        if self.state == StreamState::Terminated {
            return Vec::new();
        }
        self.state = StreamState::Terminated;
        vec![StreamFrame::Error(error_to_client(err)), StreamFrame::Done]
    }
}
