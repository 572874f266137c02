use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::bridge::{ChatMessage, ContentPart, RequestOptions, Role, ToolMode, ToolResultPart};

/// 流式传输的 Delta 消息结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
    /// Audio output; the gateway has no way to render it.
    #[serde(default)]
    pub audio: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// 流式传输的响应块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    /// Some upstreams report failures inside a 200 stream.
    #[serde(default)]
    pub error: Option<Value>,
}

// 模型列表沿用本地定义（兼容多数上游返回）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub data: Vec<UpstreamModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamModel {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
}

fn data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

fn result_text(parts: &[ToolResultPart]) -> String {
    parts
        .iter()
        .map(|p| match p {
            ToolResultPart::Text(t) => t.clone(),
            ToolResultPart::Data { mime_type, .. } => format!("[data: {}]", mime_type),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Upstream `content` for one message: a plain string unless images are present.
fn wire_content(parts: &[&ContentPart]) -> Value {
    let has_image = parts.iter().any(|p| p.is_image());
    if !has_image {
        let text: String = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) | ContentPart::Unsupported(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        return Value::String(text);
    }
    let items: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text(t) | ContentPart::Unsupported(t) => {
                Some(json!({"type": "text", "text": t}))
            }
            ContentPart::Data { bytes, mime_type } if mime_type.starts_with("image/") => Some(json!({
                "type": "image_url",
                "image_url": {"url": data_url(bytes, mime_type)},
            })),
            _ => None,
        })
        .collect();
    Value::Array(items)
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Flattens neutral messages into the upstream chat format. Tool results always become
/// their own `tool` messages, placed ahead of whatever else the message carried.
pub fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        let mut placeholders = Vec::new();
        let mut body: Vec<&ContentPart> = Vec::new();
        let mut tool_calls = Vec::new();
        let mut had_results = false;

        for part in &msg.content {
            match part {
                ContentPart::ToolResult { call_id, parts } => {
                    had_results = true;
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": result_text(parts),
                    }));
                }
                ContentPart::ToolCall {
                    call_id,
                    name,
                    input,
                } => tool_calls.push(json!({
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })),
                // 推理内容不回传上游
                ContentPart::Thinking(_) => {}
                ContentPart::Data { mime_type, .. } if !part.is_image() => {
                    placeholders.push(ContentPart::Text(format!("[data: {}]", mime_type)));
                }
                other => body.push(other),
            }
        }
        body.extend(placeholders.iter());

        if body.is_empty() && tool_calls.is_empty() && (had_results || msg.role == Role::Tool) {
            continue;
        }
        let role = match msg.role {
            Role::Tool => Role::User,
            r => r,
        };

        let mut wire = Map::new();
        wire.insert("role".into(), role_name(role).into());
        wire.insert("content".into(), wire_content(&body));
        if !tool_calls.is_empty() {
            wire.insert("tool_calls".into(), Value::Array(tool_calls));
        }
        out.push(Value::Object(wire));
    }
    out
}

/// Full streaming request body for `/v1/chat/completions`.
pub fn build_chat_request(model_id: &str, messages: &[ChatMessage], options: &RequestOptions) -> Value {
    let mut body = Map::new();
    // 透传参数先写入，显式字段覆盖
    for (k, v) in &options.extra {
        body.insert(k.clone(), v.clone());
    }
    body.insert("model".into(), model_id.into());
    body.insert("messages".into(), Value::Array(wire_messages(messages)));
    body.insert("stream".into(), Value::Bool(true));

    if let Some(t) = options.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(p) = options.top_p {
        body.insert("top_p".into(), json!(p));
    }
    if let Some(m) = options.max_tokens {
        body.insert("max_tokens".into(), json!(m));
    }
    if !options.stop.is_empty() {
        body.insert("stop".into(), json!(options.stop));
    }
    if !options.tools.is_empty() {
        let tools: Vec<Value> = options
            .tools
            .iter()
            .map(|t| {
                let mut function = Map::new();
                function.insert("name".into(), t.name.clone().into());
                if let Some(d) = &t.description {
                    function.insert("description".into(), d.clone().into());
                }
                function.insert("parameters".into(), t.input_schema.clone());
                json!({"type": "function", "function": function})
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
        let choice = match (options.tool_mode, options.tools.as_slice()) {
            (ToolMode::Required, [only]) => {
                json!({"type": "function", "function": {"name": only.name}})
            }
            (ToolMode::Required, _) => json!("required"),
            (ToolMode::Auto, _) => json!("auto"),
        };
        body.insert("tool_choice".into(), choice);
    } else {
        body.remove("tools");
        body.remove("tool_choice");
    }
    Value::Object(body)
}
