use axum::response::sse::Event;
use serde_json::{Value, json};

use super::{BlockKind, FinishReason, OutputPart, StreamFramer, Usage};

pub fn image_placeholder(mime_type: &str) -> String {
    format!("[image: {}]", mime_type)
}

pub fn finish_reason_str(finish: FinishReason) -> &'static str {
    match finish {
        FinishReason::Stop => "stop",
        FinishReason::ToolUse => "tool_calls",
    }
}

/// `chat.completion.chunk` frames, terminated by `data: [DONE]`.
pub struct OpenAiFramer {
    id: String,
    created: i64,
    model: String,
    include_usage: bool,
    tool_calls: usize,
}

impl OpenAiFramer {
    pub fn new(model: &str, include_usage: bool) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            include_usage,
            tool_calls: 0,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Event {
        let body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        Event::default().data(body.to_string())
    }
}

impl StreamFramer for OpenAiFramer {
    fn message_start(&mut self) -> Vec<Event> {
        vec![self.chunk(json!({"role": "assistant", "content": ""}), None)]
    }

    fn block_start(&mut self, _index: usize, part: &OutputPart) -> Vec<Event> {
        match part {
            OutputPart::ToolUse { id, name, .. } => {
                let index = self.tool_calls;
                self.tool_calls += 1;
                vec![self.chunk(
                    json!({"tool_calls": [{
                        "index": index,
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": ""},
                    }]}),
                    None,
                )]
            }
            _ => Vec::new(),
        }
    }

    fn block_delta(&mut self, _index: usize, part: &OutputPart) -> Vec<Event> {
        let delta = match part {
            OutputPart::Text(t) => json!({"content": t}),
            OutputPart::Thinking(t) => json!({"reasoning_content": t}),
            OutputPart::ToolUse { input, .. } => json!({"tool_calls": [{
                "index": self.tool_calls.saturating_sub(1),
                "function": {"arguments": input.to_string()},
            }]}),
            OutputPart::Image { mime_type, .. } => json!({"content": image_placeholder(mime_type)}),
        };
        vec![self.chunk(delta, None)]
    }

    fn block_stop(&mut self, _index: usize, _kind: BlockKind) -> Vec<Event> {
        Vec::new()
    }

    fn message_end(&mut self, finish: FinishReason, usage: Usage) -> Vec<Event> {
        let mut events = vec![self.chunk(json!({}), Some(finish_reason_str(finish)))];
        if self.include_usage {
            let body = json!({
                "id": self.id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "model": self.model,
                "choices": [],
                "usage": {
                    "prompt_tokens": usage.input_tokens,
                    "completion_tokens": usage.output_tokens,
                    "total_tokens": usage.input_tokens + usage.output_tokens,
                },
            });
            events.push(Event::default().data(body.to_string()));
        }
        events.push(Event::default().data("[DONE]"));
        events
    }

    fn visible_text(&self, part: &OutputPart) -> Option<String> {
        match part {
            OutputPart::Text(t) => Some(t.clone()),
            OutputPart::Image { mime_type, .. } => Some(image_placeholder(mime_type)),
            OutputPart::Thinking(_) | OutputPart::ToolUse { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::streaming::StreamState;

    #[test]
    fn tool_calls_are_indexed_per_tool_not_per_block() {
        let mut framer = OpenAiFramer::new("m", false);
        let mut state = StreamState::default();
        state.advance(&mut framer, &OutputPart::Text("hi".into()));
        let events = state.advance(
            &mut framer,
            &OutputPart::ToolUse {
                id: "call_1".into(),
                name: "weather".into(),
                input: json!({"city": "Paris"}),
            },
        );
        // start chunk + arguments chunk
        assert_eq!(events.len(), 2);
        assert_eq!(framer.tool_calls, 1);
        assert_eq!(state.output_text(), "hi");
    }

    #[test]
    fn message_end_with_usage_precedes_done() {
        let mut framer = OpenAiFramer::new("m", true);
        let events = framer.message_end(
            FinishReason::ToolUse,
            Usage {
                input_tokens: 3,
                output_tokens: 4,
            },
        );
        assert_eq!(events.len(), 3);
        let mut without = OpenAiFramer::new("m", false);
        assert_eq!(without.message_end(FinishReason::Stop, Usage::default()).len(), 2);
    }
}
