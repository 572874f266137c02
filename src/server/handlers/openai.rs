use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{Value, json};

use crate::auth::ApiKeyBinding;
use crate::bridge::ChatModel;
use crate::error::GatewayError;
use crate::logging::ApiFormat;
use crate::server::AppState;
use crate::server::chat::{ChatProtocol, Collected, run_chat};
use crate::server::chat_request::{OpenAiChatRequest, ParsedChat};
use crate::server::streaming::openai::{OpenAiFramer, finish_reason_str, image_placeholder};
use crate::server::streaming::{FinishReason, OutputPart, Usage};

pub struct OpenAiChat;

impl ChatProtocol for OpenAiChat {
    const FORMAT: ApiFormat = ApiFormat::OpenAi;
    type Framer = OpenAiFramer;

    fn parse(body: Value) -> Result<ParsedChat, GatewayError> {
        OpenAiChatRequest::from_value(body)?.into_parsed()
    }

    fn framer(model: &ChatModel, parsed: &ParsedChat, _input_tokens: u32) -> OpenAiFramer {
        OpenAiFramer::new(&model.id, parsed.include_usage)
    }

    // 图片在 OpenAI 响应里只能以文本占位
    fn output_text(collected: &Collected) -> String {
        collected
            .parts
            .iter()
            .filter_map(|p| match p {
                OutputPart::Text(t) => Some(t.clone()),
                OutputPart::Image { mime_type, .. } => Some(image_placeholder(mime_type)),
                _ => None,
            })
            .collect()
    }

    fn render(collected: &Collected, model: &ChatModel, usage: Usage) -> Value {
        let tool_calls: Vec<Value> = collected
            .parts
            .iter()
            .filter_map(|p| match p {
                OutputPart::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })),
                _ => None,
            })
            .collect();

        let mut message = json!({
            "role": "assistant",
            "content": Self::output_text(collected),
        });
        let thinking = collected.thinking();
        if !thinking.is_empty() {
            message["reasoning_content"] = Value::String(thinking);
        }
        let finish = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            message["tool_calls"] = Value::Array(tool_calls);
            FinishReason::ToolUse
        };

        json!({
            "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": model.id,
            "choices": [{
                "index": 0,
                "message": message,
                "logprobs": null,
                "finish_reason": finish_reason_str(finish),
            }],
            "usage": {
                "prompt_tokens": usage.input_tokens,
                "completion_tokens": usage.output_tokens,
                "total_tokens": usage.input_tokens + usage.output_tokens,
            },
        })
    }
}

fn model_object(state: &AppState, binding: &ApiKeyBinding) -> Value {
    let owned_by = state
        .bridge
        .find_model(&binding.model_id)
        .map(|m| m.vendor)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "system".to_string());
    json!({
        "id": binding.model_id,
        "object": "model",
        "created": binding.created_at.timestamp(),
        "owned_by": owned_by,
    })
}

/// Only the model bound to the caller's key, never the whole registry.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(binding): Extension<ApiKeyBinding>,
) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [model_object(&state, &binding)],
    }))
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Extension(binding): Extension<ApiKeyBinding>,
    Path(id): Path<String>,
) -> Response {
    let bound = state.bridge.find_model(&binding.model_id);
    let same_model = id == binding.model_id
        || matches!((&bound, state.bridge.find_model(&id)), (Some(b), Some(r)) if b.id == r.id);
    if !same_model {
        return GatewayError::NotFound(format!("The model '{}' does not exist", id))
            .with_format(ApiFormat::OpenAi)
            .into_response();
    }
    Json(model_object(&state, &binding)).into_response()
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(binding): Extension<ApiKeyBinding>,
    body: Body,
) -> Response {
    run_chat::<OpenAiChat>(state, binding, body).await
}
