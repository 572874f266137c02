//! Wire-format message arrays → protocol-neutral [`ChatMessage`]s.
//!
//! Both converters are total: any shape they do not recognise becomes a text placeholder
//! instead of being dropped or rejected.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use serde_json::{Value, json};

use super::types::{ChatMessage, ContentPart, Role, ToolResultPart};

pub const UNSUPPORTED_CONTENT: &str = "[unsupported content]";

fn unsupported(kind: Option<&str>) -> ContentPart {
    match kind {
        Some(k) if !k.is_empty() => ContentPart::text(format!("[unsupported content: {}]", k)),
        _ => ContentPart::text(UNSUPPORTED_CONTENT),
    }
}

/// Splits a `data:<mime>;base64,<payload>` URL into decoded bytes and mime type.
pub fn decode_data_url(url: &str) -> Option<(Vec<u8>, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mut meta_parts = meta.split(';');
    let mime = meta_parts.next().filter(|m| !m.is_empty()).unwrap_or("application/octet-stream");
    if !meta_parts.any(|p| p.eq_ignore_ascii_case("base64")) {
        return None;
    }
    let bytes = B64_STANDARD.decode(data.trim()).ok()?;
    Some((bytes, mime.to_string()))
}

fn image_from_url(url: &str) -> ContentPart {
    match decode_data_url(url) {
        Some((bytes, mime_type)) => ContentPart::Data { bytes, mime_type },
        None if url.starts_with("data:") => unsupported(Some("image")),
        // 远程图片不在网关侧下载
        None => ContentPart::text(format!("[image: {}]", url)),
    }
}

fn parse_tool_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|e| {
            tracing::warn!("Tool call arguments are not valid JSON: {}", e);
            json!({})
        }),
        Value::Object(_) => raw.clone(),
        _ => json!({}),
    }
}

// ---------------------------------------------------------------------------
// OpenAI

fn openai_content_parts(content: Option<&Value>) -> Vec<ContentPart> {
    match content {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![ContentPart::text(s.clone())],
        Some(Value::Array(items)) => items.iter().map(openai_content_item).collect(),
        Some(_) => vec![unsupported(None)],
    }
}

fn openai_content_item(item: &Value) -> ContentPart {
    if let Value::String(s) = item {
        return ContentPart::text(s.clone());
    }
    let kind = item.get("type").and_then(Value::as_str);
    match kind {
        Some("text") | Some("input_text") => match item.get("text").and_then(Value::as_str) {
            Some(t) => ContentPart::text(t),
            None => unsupported(kind),
        },
        Some("refusal") => match item.get("refusal").and_then(Value::as_str) {
            Some(t) => ContentPart::text(t),
            None => unsupported(kind),
        },
        Some("image_url") => {
            let url = item
                .get("image_url")
                .and_then(|u| u.get("url").or(Some(u)))
                .and_then(Value::as_str);
            match url {
                Some(u) => image_from_url(u),
                None => unsupported(kind),
            }
        }
        _ => unsupported(kind),
    }
}

fn openai_tool_result_parts(content: Option<&Value>) -> Vec<ToolResultPart> {
    openai_content_parts(content)
        .into_iter()
        .map(|p| match p {
            ContentPart::Data { bytes, mime_type } => ToolResultPart::Data { bytes, mime_type },
            ContentPart::Text(t) => ToolResultPart::Text(t),
            _ => ToolResultPart::Text(UNSUPPORTED_CONTENT.to_string()),
        })
        .collect()
}

pub fn convert_openai_messages(messages: &[Value]) -> Vec<ChatMessage> {
    messages.iter().map(convert_openai_message).collect()
}

fn convert_openai_message(msg: &Value) -> ChatMessage {
    let Some(obj) = msg.as_object() else {
        return ChatMessage::new(Role::User, vec![unsupported(None)]);
    };
    let role = obj.get("role").and_then(Value::as_str).unwrap_or("user");
    let content = obj.get("content");

    match role {
        "system" | "developer" => ChatMessage::new(Role::System, openai_content_parts(content)),
        "assistant" => {
            let mut parts = openai_content_parts(content);
            if let Some(reasoning) = obj.get("reasoning_content").and_then(Value::as_str)
                && !reasoning.is_empty()
            {
                parts.insert(0, ContentPart::Thinking(reasoning.to_string()));
            }
            if let Some(Value::Array(calls)) = obj.get("tool_calls") {
                for call in calls {
                    let function = call.get("function");
                    let name = function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str);
                    match name {
                        Some(name) => parts.push(ContentPart::ToolCall {
                            call_id: call
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            name: name.to_string(),
                            input: function
                                .and_then(|f| f.get("arguments"))
                                .map(parse_tool_arguments)
                                .unwrap_or_else(|| json!({})),
                        }),
                        None => parts.push(unsupported(Some("tool_call"))),
                    }
                }
            }
            // legacy single function_call
            if let Some(fc) = obj.get("function_call")
                && let Some(name) = fc.get("name").and_then(Value::as_str)
            {
                parts.push(ContentPart::ToolCall {
                    call_id: name.to_string(),
                    name: name.to_string(),
                    input: fc
                        .get("arguments")
                        .map(parse_tool_arguments)
                        .unwrap_or_else(|| json!({})),
                });
            }
            ChatMessage::new(Role::Assistant, parts)
        }
        "tool" | "function" => {
            let call_id = obj
                .get("tool_call_id")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ChatMessage::new(
                Role::Tool,
                vec![ContentPart::ToolResult {
                    call_id,
                    parts: openai_tool_result_parts(content),
                }],
            )
        }
        _ => ChatMessage::new(Role::User, openai_content_parts(content)),
    }
}

// ---------------------------------------------------------------------------
// Anthropic

fn anthropic_image(block: &Value) -> ContentPart {
    let source = block.get("source");
    match source.and_then(|s| s.get("type")).and_then(Value::as_str) {
        Some("base64") => {
            let data = source.and_then(|s| s.get("data")).and_then(Value::as_str);
            let mime = source
                .and_then(|s| s.get("media_type"))
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream");
            match data.and_then(|d| B64_STANDARD.decode(d.trim()).ok()) {
                Some(bytes) => ContentPart::Data {
                    bytes,
                    mime_type: mime.to_string(),
                },
                None => unsupported(Some("image")),
            }
        }
        Some("url") => match source.and_then(|s| s.get("url")).and_then(Value::as_str) {
            Some(url) => ContentPart::text(format!("[image: {}]", url)),
            None => unsupported(Some("image")),
        },
        _ => unsupported(Some("image")),
    }
}

fn anthropic_tool_result(block: &Value) -> ContentPart {
    let call_id = block
        .get("tool_use_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut parts = match block.get("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![ToolResultPart::Text(s.clone())],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match anthropic_block(item) {
                ContentPart::Text(t) => ToolResultPart::Text(t),
                ContentPart::Data { bytes, mime_type } => ToolResultPart::Data { bytes, mime_type },
                _ => ToolResultPart::Text(UNSUPPORTED_CONTENT.to_string()),
            })
            .collect(),
        Some(_) => vec![ToolResultPart::Text(UNSUPPORTED_CONTENT.to_string())],
    };
    if block.get("is_error").and_then(Value::as_bool) == Some(true) {
        parts.insert(0, ToolResultPart::Text("[tool error]".to_string()));
    }
    ContentPart::ToolResult { call_id, parts }
}

fn anthropic_block(block: &Value) -> ContentPart {
    if let Value::String(s) = block {
        return ContentPart::text(s.clone());
    }
    let kind = block.get("type").and_then(Value::as_str);
    match kind {
        Some("text") => match block.get("text").and_then(Value::as_str) {
            Some(t) => ContentPart::text(t),
            None => unsupported(kind),
        },
        Some("image") => anthropic_image(block),
        Some("tool_use") => match block.get("name").and_then(Value::as_str) {
            Some(name) => ContentPart::ToolCall {
                call_id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: name.to_string(),
                input: block.get("input").cloned().unwrap_or_else(|| json!({})),
            },
            None => unsupported(kind),
        },
        Some("tool_result") => anthropic_tool_result(block),
        Some("thinking") => match block.get("thinking").and_then(Value::as_str) {
            Some(t) => ContentPart::Thinking(t.to_string()),
            None => unsupported(kind),
        },
        Some("redacted_thinking") => ContentPart::Thinking("[redacted_thinking]".to_string()),
        _ => unsupported(kind),
    }
}

fn anthropic_content(content: Option<&Value>) -> Vec<ContentPart> {
    match content {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![ContentPart::text(s.clone())],
        Some(Value::Array(blocks)) => blocks.iter().map(anthropic_block).collect(),
        Some(other) => vec![anthropic_block(other)],
    }
}

/// `system` becomes a leading user message, matching what providers without a system role expect.
pub fn convert_anthropic_messages(system: Option<&Value>, messages: &[Value]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);

    let system_parts = anthropic_content(system);
    if !system_parts.is_empty() {
        out.push(ChatMessage::new(Role::User, system_parts));
    }

    for msg in messages {
        let Some(obj) = msg.as_object() else {
            out.push(ChatMessage::new(Role::User, vec![unsupported(None)]));
            continue;
        };
        let role = match obj.get("role").and_then(Value::as_str) {
            Some("assistant") => Role::Assistant,
            _ => Role::User,
        };
        out.push(ChatMessage::new(role, anthropic_content(obj.get("content"))));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_text_and_system_messages() {
        let msgs = convert_openai_messages(&[
            json!({"role": "system", "content": "be brief"}),
            json!({"role": "user", "content": "hi"}),
        ]);
        assert_eq!(msgs[0], ChatMessage::text(Role::System, "be brief"));
        assert_eq!(msgs[1], ChatMessage::text(Role::User, "hi"));
    }

    #[test]
    fn openai_multimodal_user_message() {
        let msgs = convert_openai_messages(&[json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGVsbG8="}},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
                {"type": "input_audio", "input_audio": {"data": "...", "format": "wav"}}
            ]
        })]);
        let parts = &msgs[0].content;
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], ContentPart::text("what is this?"));
        assert_eq!(
            parts[1],
            ContentPart::Data {
                bytes: b"hello".to_vec(),
                mime_type: "image/png".into()
            }
        );
        assert_eq!(parts[2], ContentPart::text("[image: https://example.com/cat.png]"));
        assert_eq!(parts[3], ContentPart::text("[unsupported content: input_audio]"));
    }

    #[test]
    fn openai_tool_calls_and_results() {
        let msgs = convert_openai_messages(&[
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                }]
            }),
            json!({"role": "tool", "tool_call_id": "call_1", "content": "sunny"}),
        ]);
        assert_eq!(
            msgs[0].content,
            vec![ContentPart::ToolCall {
                call_id: "call_1".into(),
                name: "get_weather".into(),
                input: json!({"city": "Paris"}),
            }]
        );
        assert_eq!(msgs[1].role, Role::Tool);
        assert_eq!(
            msgs[1].content,
            vec![ContentPart::ToolResult {
                call_id: "call_1".into(),
                parts: vec![ToolResultPart::Text("sunny".into())],
            }]
        );
    }

    #[test]
    fn openai_garbage_becomes_placeholders() {
        let msgs = convert_openai_messages(&[json!(42), json!({"role": "user", "content": {"x": 1}})]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, vec![ContentPart::text(UNSUPPORTED_CONTENT)]);
        assert_eq!(msgs[1].content, vec![ContentPart::text(UNSUPPORTED_CONTENT)]);
    }

    #[test]
    fn anthropic_system_is_prepended_as_user() {
        let msgs = convert_anthropic_messages(
            Some(&json!([{"type": "text", "text": "rules"}])),
            &[json!({"role": "user", "content": "hi"})],
        );
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], ChatMessage::text(Role::User, "rules"));
        assert_eq!(msgs[1], ChatMessage::text(Role::User, "hi"));
    }

    #[test]
    fn anthropic_blocks_map_to_parts() {
        let msgs = convert_anthropic_messages(
            None,
            &[
                json!({"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "s"},
                    {"type": "text", "text": "calling"},
                    {"type": "tool_use", "id": "tu_1", "name": "search", "input": {"q": "rust"}}
                ]}),
                json!({"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "tu_1", "content": [{"type": "text", "text": "found"}]},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "aGk="}},
                    {"type": "document", "source": {}}
                ]}),
            ],
        );
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].content[0], ContentPart::Thinking("hmm".into()));
        assert_eq!(msgs[0].content[1], ContentPart::text("calling"));
        assert!(matches!(&msgs[0].content[2], ContentPart::ToolCall { name, .. } if name == "search"));

        assert_eq!(
            msgs[1].content[0],
            ContentPart::ToolResult {
                call_id: "tu_1".into(),
                parts: vec![ToolResultPart::Text("found".into())],
            }
        );
        assert!(msgs[1].content[1].is_image());
        assert_eq!(msgs[1].content[2], ContentPart::text("[unsupported content: document]"));
    }

    #[test]
    fn data_url_requires_base64_marker() {
        assert!(decode_data_url("data:text/plain,hello").is_none());
        assert_eq!(
            decode_data_url("data:;base64,aGk=").unwrap().1,
            "application/octet-stream"
        );
    }
}
