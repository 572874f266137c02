use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable snapshot of one model the provider exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub max_input_tokens: u32,
}

impl ChatModel {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            family: id.clone(),
            id,
            vendor: String::new(),
            version: String::new(),
            max_input_tokens: 0,
        }
    }

    /// Fills blank display name / family from the id.
    pub fn normalized(mut self) -> Self {
        if self.display_name.trim().is_empty() {
            self.display_name = self.id.clone();
        }
        if self.family.trim().is_empty() {
            self.family = self.id.clone();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    #[cfg(test)]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentPart::text(text)])
    }
}

/// Protocol-neutral unit of content. The variant is the part's kind; nothing is inferred at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Freeform reasoning, not part of the final answer. Providers may never emit it.
    Thinking(String),
    ToolCall {
        call_id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        call_id: String,
        parts: Vec<ToolResultPart>,
    },
    Data {
        bytes: Vec<u8>,
        mime_type: String,
    },
    /// Something the provider produced but could not classify.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolResultPart {
    Text(String),
    Data { bytes: Vec<u8>, mime_type: String },
}

impl ContentPart {
    pub fn text(value: impl Into<String>) -> Self {
        ContentPart::Text(value.into())
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::Data { mime_type, .. } if mime_type.starts_with("image/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// How the provider may invoke tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolMode {
    #[default]
    Auto,
    Required,
}

/// Client-side tool choice, common to both wire formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Tool(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_mode: ToolMode,
    /// OpenAI-wire parameters forwarded untouched (seed, penalties, ...).
    pub extra: Map<String, Value>,
}

impl RequestOptions {
    pub fn apply_tool_choice(&mut self, choice: ToolChoice) {
        match choice {
            ToolChoice::Auto => self.tool_mode = ToolMode::Auto,
            ToolChoice::Required => self.tool_mode = ToolMode::Required,
            ToolChoice::None => {
                self.tools.clear();
                self.tool_mode = ToolMode::Auto;
            }
            ToolChoice::Tool(name) => {
                // 指定工具：只保留该工具并强制调用；名字不存在时保留全部工具
                if self.tools.iter().any(|t| t.name == name) {
                    self.tools.retain(|t| t.name == name);
                }
                self.tool_mode = ToolMode::Required;
            }
        }
    }
}
