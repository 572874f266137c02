use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{Value, json};

use crate::auth::ApiKeyBinding;
use crate::bridge::ChatModel;
use crate::error::GatewayError;
use crate::logging::ApiFormat;
use crate::server::AppState;
use crate::server::chat::{ChatProtocol, Collected, bound_model, run_chat};
use crate::server::chat_request::{AnthropicMessagesRequest, ParsedChat};
use crate::server::streaming::anthropic::{AnthropicFramer, image_source, stop_reason_str};
use crate::server::streaming::{FinishReason, OutputPart, Usage};
use crate::server::util::read_json_body;

pub struct AnthropicChat;

impl ChatProtocol for AnthropicChat {
    const FORMAT: ApiFormat = ApiFormat::Anthropic;
    type Framer = AnthropicFramer;

    fn parse(body: Value) -> Result<ParsedChat, GatewayError> {
        AnthropicMessagesRequest::from_value(body)?.into_parsed()
    }

    fn framer(model: &ChatModel, _parsed: &ParsedChat, input_tokens: u32) -> AnthropicFramer {
        AnthropicFramer::new(&model.id, input_tokens)
    }

    fn output_text(collected: &Collected) -> String {
        collected.text()
    }

    fn render(collected: &Collected, model: &ChatModel, usage: Usage) -> Value {
        let mut content: Vec<Value> = collected
            .parts
            .iter()
            .map(|p| match p {
                OutputPart::Text(t) => json!({"type": "text", "text": t}),
                OutputPart::Thinking(t) => json!({"type": "thinking", "thinking": t}),
                OutputPart::ToolUse { id, name, input } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                OutputPart::Image { data, mime_type } => {
                    json!({"type": "image", "source": image_source(data, mime_type)})
                }
            })
            .collect();
        if content.is_empty() {
            content.push(json!({"type": "text", "text": ""}));
        }
        let finish = if collected.has_tool_calls() {
            FinishReason::ToolUse
        } else {
            FinishReason::Stop
        };

        json!({
            "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
            "type": "message",
            "role": "assistant",
            "model": model.id,
            "content": content,
            "stop_reason": stop_reason_str(finish),
            "stop_sequence": null,
            "usage": {
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens,
            },
        })
    }
}

pub async fn messages(
    State(state): State<Arc<AppState>>,
    Extension(binding): Extension<ApiKeyBinding>,
    body: Body,
) -> Response {
    run_chat::<AnthropicChat>(state, binding, body).await
}

/// `POST /v1/messages/count_tokens`: the input side of `/v1/messages` without invoking the model.
pub async fn count_tokens(
    State(state): State<Arc<AppState>>,
    Extension(binding): Extension<ApiKeyBinding>,
    body: Body,
) -> Response {
    let result = async {
        let value = read_json_body(body, state.config.server.max_body_bytes).await?;
        let parsed = AnthropicChat::parse(value)?;
        let model = bound_model(&state, &binding)?;
        Ok::<_, GatewayError>(state.bridge.count_tokens(&model, &parsed.input_text).await)
    }
    .await;
    match result {
        Ok(input_tokens) => Json(json!({"input_tokens": input_tokens})).into_response(),
        Err(e) => e.with_format(ApiFormat::Anthropic).into_response(),
    }
}
