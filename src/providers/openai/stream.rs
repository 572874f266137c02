use std::collections::BTreeMap;

use serde_json::Value;

use crate::bridge::ContentPart;
use crate::providers::ProviderError;

use super::types::StreamChunk;

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns upstream chat-completion chunks into content parts.
///
/// Text and reasoning fragments pass straight through. Tool calls arrive split across
/// chunks keyed by `index`; they are buffered and released whole once the choice finishes
/// (or the stream ends).
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    tool_calls: BTreeMap<usize, PendingToolCall>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &str) -> Result<Vec<ContentPart>, ProviderError> {
        let chunk: StreamChunk =
            serde_json::from_str(data).map_err(|e| ProviderError::Decode(e.to_string()))?;

        if let Some(err) = chunk.error {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(ProviderError::Upstream {
                status: 200,
                message,
            });
        }

        let mut parts = Vec::new();
        // 只处理第一个 choice
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(parts);
        };
        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content
            && !reasoning.is_empty()
        {
            parts.push(ContentPart::Thinking(reasoning));
        }
        if let Some(content) = delta.content
            && !content.is_empty()
        {
            parts.push(ContentPart::text(content));
        }
        if delta.audio.is_some() {
            parts.push(ContentPart::Unsupported("audio".into()));
        }
        for tc in delta.tool_calls {
            let pending = self.tool_calls.entry(tc.index).or_default();
            if let Some(id) = tc.id
                && !id.is_empty()
            {
                pending.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    pending.name.push_str(&name);
                }
                if let Some(args) = function.arguments {
                    pending.arguments.push_str(&args);
                }
            }
        }
        if choice.finish_reason.is_some() {
            parts.extend(self.flush());
        }
        Ok(parts)
    }

    /// Releases every buffered tool call in index order.
    pub fn flush(&mut self) -> Vec<ContentPart> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|tc| {
                let input = if tc.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&tc.arguments).unwrap_or_else(|e| {
                        tracing::warn!(tool = %tc.name, "Upstream tool arguments are not valid JSON: {}", e);
                        Value::Object(Default::default())
                    })
                };
                let call_id = if tc.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    tc.id
                };
                ContentPart::ToolCall {
                    call_id,
                    name: tc.name,
                    input,
                }
            })
            .collect()
    }
}
