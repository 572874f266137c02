//! Inbound request bodies of both protocols, reduced to one provider call.
//!
//! The client's `model` field is accepted and ignored: the binding decides the model.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::bridge::{
    ChatMessage, RequestOptions, ToolChoice, ToolDefinition, convert_anthropic_messages,
    convert_openai_messages,
};
use crate::error::GatewayError;

/// What every chat handler needs from a request, whichever protocol it came in on.
#[derive(Debug, Clone)]
pub struct ParsedChat {
    pub messages: Vec<ChatMessage>,
    /// Serialized wire input, used for the input token estimate and the request log.
    pub input_text: String,
    pub options: RequestOptions,
    pub stream: bool,
    pub include_usage: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StopField {
    One(String),
    Many(Vec<String>),
}

impl StopField {
    fn into_vec(self) -> Vec<String> {
        match self {
            StopField::One(s) => vec![s],
            StopField::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: Option<bool>,
}

fn bad_request(e: serde_json::Error) -> GatewayError {
    GatewayError::BadRequest(format!("Invalid request body: {}", e))
}

fn require_messages(messages: &[Value]) -> Result<(), GatewayError> {
    if messages.is_empty() {
        return Err(GatewayError::BadRequest("messages must be a non-empty array".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpenAI

#[derive(Debug, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<StopField>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    // 旧版 functions / function_call
    #[serde(default)]
    pub functions: Option<Vec<Value>>,
    #[serde(default)]
    pub function_call: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn openai_tool(tool: &Value) -> Option<ToolDefinition> {
    // `{type:"function", function:{...}}` or a bare legacy function object
    let function = match tool.get("type").and_then(Value::as_str) {
        Some("function") => tool.get("function")?,
        Some(_) => return None,
        None => tool,
    };
    let name = function.get("name")?.as_str()?.to_string();
    Some(ToolDefinition {
        name,
        description: function
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        input_schema: function
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
    })
}

fn openai_tool_choice(choice: &Value) -> Option<ToolChoice> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(ToolChoice::Auto),
            "required" | "any" => Some(ToolChoice::Required),
            "none" => Some(ToolChoice::None),
            _ => None,
        },
        Value::Object(o) => o
            .get("function")
            .and_then(|f| f.get("name"))
            .or_else(|| o.get("name"))
            .and_then(Value::as_str)
            .map(|n| ToolChoice::Tool(n.to_string())),
        _ => None,
    }
}

impl OpenAiChatRequest {
    pub fn from_value(body: Value) -> Result<Self, GatewayError> {
        serde_json::from_value(body).map_err(bad_request)
    }

    pub fn into_parsed(mut self) -> Result<ParsedChat, GatewayError> {
        require_messages(&self.messages)?;
        tracing::trace!(requested = ?self.model, "Client model field ignored");
        let input_text = Value::Array(self.messages.clone()).to_string();
        let messages = convert_openai_messages(&self.messages);

        let tool_values = self.tools.take().or(self.functions.take()).unwrap_or_default();
        let mut options = RequestOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_completion_tokens.or(self.max_tokens),
            stop: self.stop.take().map(StopField::into_vec).unwrap_or_default(),
            tools: tool_values.iter().filter_map(openai_tool).collect(),
            ..Default::default()
        };
        if let Some(choice) = self
            .tool_choice
            .as_ref()
            .or(self.function_call.as_ref())
            .and_then(openai_tool_choice)
        {
            options.apply_tool_choice(choice);
        }

        // 只产生一个 choice
        self.extra.remove("n");
        options.extra = self.extra;

        Ok(ParsedChat {
            messages,
            input_text,
            options,
            stream: self.stream.unwrap_or(false),
            include_usage: self
                .stream_options
                .and_then(|o| o.include_usage)
                .unwrap_or(false),
        })
    }
}

// ---------------------------------------------------------------------------
// Anthropic

#[derive(Debug, Deserialize)]
pub struct AnthropicMessagesRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub system: Option<Value>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn anthropic_tool(tool: &Value) -> Option<ToolDefinition> {
    // 服务端工具（web_search 等）没有 input_schema，无法转发
    if let Some(kind) = tool.get("type").and_then(Value::as_str)
        && kind != "custom"
    {
        return None;
    }
    Some(ToolDefinition {
        name: tool.get("name")?.as_str()?.to_string(),
        description: tool
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        input_schema: tool.get("input_schema")?.clone(),
    })
}

fn anthropic_tool_choice(choice: &Value) -> Option<ToolChoice> {
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(ToolChoice::Auto),
        "any" => Some(ToolChoice::Required),
        "none" => Some(ToolChoice::None),
        "tool" => choice
            .get("name")
            .and_then(Value::as_str)
            .map(|n| ToolChoice::Tool(n.to_string())),
        _ => None,
    }
}

impl AnthropicMessagesRequest {
    pub fn from_value(body: Value) -> Result<Self, GatewayError> {
        serde_json::from_value(body).map_err(bad_request)
    }

    pub fn into_parsed(mut self) -> Result<ParsedChat, GatewayError> {
        require_messages(&self.messages)?;
        tracing::trace!(requested = ?self.model, "Client model field ignored");
        let input_text = match &self.system {
            Some(Value::String(s)) => format!("{}\n{}", s, Value::Array(self.messages.clone())),
            Some(other) => format!("{}\n{}", other, Value::Array(self.messages.clone())),
            None => Value::Array(self.messages.clone()).to_string(),
        };
        let messages = convert_anthropic_messages(self.system.as_ref(), &self.messages);

        let mut options = RequestOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop: self.stop_sequences.take().unwrap_or_default(),
            tools: self
                .tools
                .take()
                .unwrap_or_default()
                .iter()
                .filter_map(anthropic_tool)
                .collect(),
            ..Default::default()
        };
        if let Some(choice) = self.tool_choice.as_ref().and_then(anthropic_tool_choice) {
            options.apply_tool_choice(choice);
        }

        // 上游是 OpenAI 线协议：Anthropic 独有字段（top_k、metadata、thinking 等）一律不透传
        if !self.extra.is_empty() {
            let dropped: Vec<&str> = self.extra.keys().map(String::as_str).collect();
            tracing::debug!(?dropped, "Ignoring Anthropic-only request fields");
        }

        Ok(ParsedChat {
            messages,
            input_text,
            options,
            stream: self.stream.unwrap_or(false),
            include_usage: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ToolMode;
    use crate::providers::openai::types::build_chat_request;
    use serde_json::json;

    #[test]
    fn openai_options_mapping() {
        let parsed = OpenAiChatRequest::from_value(json!({
            "model": "ignored",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "stream_options": {"include_usage": true},
            "temperature": 0.2,
            "max_tokens": 10,
            "max_completion_tokens": 20,
            "stop": "END",
            "seed": 42,
            "n": 3,
            "tools": [
                {"type": "function", "function": {"name": "a", "parameters": {"type": "object"}}},
                {"type": "function", "function": {"name": "b"}}
            ],
            "tool_choice": {"type": "function", "function": {"name": "b"}}
        }))
        .unwrap()
        .into_parsed()
        .unwrap();

        assert!(parsed.stream);
        assert!(parsed.include_usage);
        assert_eq!(parsed.options.max_tokens, Some(20));
        assert_eq!(parsed.options.stop, vec!["END".to_string()]);
        assert_eq!(parsed.options.tools.len(), 1);
        assert_eq!(parsed.options.tools[0].name, "b");
        assert_eq!(parsed.options.tool_mode, ToolMode::Required);
        assert_eq!(parsed.options.extra.get("seed"), Some(&json!(42)));
        assert!(parsed.options.extra.get("n").is_none());
        assert!(parsed.options.extra.get("model").is_none());
        assert!(parsed.input_text.contains("hi"));
    }

    #[test]
    fn openai_tool_choice_none_strips_tools() {
        let parsed = OpenAiChatRequest::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function", "function": {"name": "a"}}],
            "tool_choice": "none"
        }))
        .unwrap()
        .into_parsed()
        .unwrap();
        assert!(parsed.options.tools.is_empty());
        assert!(!parsed.stream);
    }

    #[test]
    fn anthropic_options_mapping() {
        let parsed = AnthropicMessagesRequest::from_value(json!({
            "model": "claude-whatever",
            "system": "rules",
            "max_tokens": 256,
            "stop_sequences": ["\n\nHuman:"],
            "top_k": 5,
            "metadata": {"user_id": "u"},
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"name": "lookup", "input_schema": {"type": "object"}},
                {"type": "web_search_20250305", "name": "web_search"}
            ],
            "tool_choice": {"type": "any"}
        }))
        .unwrap()
        .into_parsed()
        .unwrap();

        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.options.max_tokens, Some(256));
        assert_eq!(parsed.options.stop.len(), 1);
        assert_eq!(parsed.options.tools.len(), 1);
        assert_eq!(parsed.options.tool_mode, ToolMode::Required);
        assert!(parsed.options.extra.is_empty());
        assert!(parsed.input_text.starts_with("rules\n"));
    }

    #[test]
    fn anthropic_only_fields_never_reach_the_upstream_body() {
        let parsed = AnthropicMessagesRequest::from_value(json!({
            "max_tokens": 16,
            "top_k": 5,
            "context_management": {"edits": []},
            "container": "c-1",
            "mcp_servers": [],
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
        .into_parsed()
        .unwrap();

        let body = build_chat_request("m-1", &parsed.messages, &parsed.options);
        let mut keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["max_tokens", "messages", "model", "stream"]);
    }

    #[test]
    fn missing_messages_and_wrong_types_are_rejected() {
        let err = OpenAiChatRequest::from_value(json!({"messages": []}))
            .unwrap()
            .into_parsed()
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
        assert!(AnthropicMessagesRequest::from_value(json!({"messages": "hi"})).is_err());
    }
}
