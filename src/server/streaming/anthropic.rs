use axum::response::sse::Event;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use super::{BlockKind, FinishReason, OutputPart, StreamFramer, Usage};

pub fn stop_reason_str(finish: FinishReason) -> &'static str {
    match finish {
        FinishReason::Stop => "end_turn",
        FinishReason::ToolUse => "tool_use",
    }
}

pub fn image_source(data: &[u8], mime_type: &str) -> Value {
    json!({
        "type": "base64",
        "media_type": mime_type,
        "data": STANDARD.encode(data),
    })
}

fn event(name: &str, body: Value) -> Event {
    Event::default().event(name).data(body.to_string())
}

/// Named `message_*` / `content_block_*` events.
pub struct AnthropicFramer {
    id: String,
    model: String,
    input_tokens: u32,
}

impl AnthropicFramer {
    pub fn new(model: &str, input_tokens: u32) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            input_tokens,
        }
    }
}

impl StreamFramer for AnthropicFramer {
    fn message_start(&mut self) -> Vec<Event> {
        vec![event(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": self.input_tokens, "output_tokens": 0},
                },
            }),
        )]
    }

    fn block_start(&mut self, index: usize, part: &OutputPart) -> Vec<Event> {
        let block = match part {
            OutputPart::Text(_) => json!({"type": "text", "text": ""}),
            OutputPart::Thinking(_) => json!({"type": "thinking", "thinking": ""}),
            OutputPart::ToolUse { id, name, .. } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": {}})
            }
            // 图片没有增量事件，整块放在 start 里
            OutputPart::Image { data, mime_type } => {
                json!({"type": "image", "source": image_source(data, mime_type)})
            }
        };
        vec![event(
            "content_block_start",
            json!({"type": "content_block_start", "index": index, "content_block": block}),
        )]
    }

    fn block_delta(&mut self, index: usize, part: &OutputPart) -> Vec<Event> {
        let delta = match part {
            OutputPart::Text(t) => json!({"type": "text_delta", "text": t}),
            OutputPart::Thinking(t) => json!({"type": "thinking_delta", "thinking": t}),
            OutputPart::ToolUse { input, .. } => {
                json!({"type": "input_json_delta", "partial_json": input.to_string()})
            }
            // Anthropic 协议没有图片 delta 类型：图片块刻意只发 start + stop，数据已在 start 中
            OutputPart::Image { .. } => return Vec::new(),
        };
        vec![event(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": index, "delta": delta}),
        )]
    }

    fn block_stop(&mut self, index: usize, _kind: BlockKind) -> Vec<Event> {
        vec![event(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        )]
    }

    fn message_end(&mut self, finish: FinishReason, usage: Usage) -> Vec<Event> {
        vec![
            event(
                "message_delta",
                json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": stop_reason_str(finish), "stop_sequence": null},
                    "usage": {"output_tokens": usage.output_tokens},
                }),
            ),
            event("message_stop", json!({"type": "message_stop"})),
        ]
    }

    fn visible_text(&self, part: &OutputPart) -> Option<String> {
        match part {
            OutputPart::Text(t) => Some(t.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::streaming::StreamState;

    #[test]
    fn image_block_is_start_then_stop() {
        let mut framer = AnthropicFramer::new("m", 0);
        let mut state = StreamState::default();
        let events = state.advance(
            &mut framer,
            &OutputPart::Image {
                data: vec![1, 2, 3],
                mime_type: "image/png".into(),
            },
        );
        assert_eq!(events.len(), 2);
        assert_eq!(state.output_text(), "");
    }

    #[test]
    fn stop_reasons() {
        assert_eq!(stop_reason_str(FinishReason::ToolUse), "tool_use");
        assert_eq!(stop_reason_str(FinishReason::Stop), "end_turn");
    }
}
