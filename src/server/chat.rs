//! Request pipeline shared by both chat protocols: parse, resolve the bound model, invoke the
//! bridge, then render one JSON body or an SSE stream.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::ApiKeyBinding;
use crate::bridge::{ChatModel, PartEvent, PartSequence};
use crate::error::GatewayError;
use crate::logging::ApiFormat;
use crate::server::AppState;
use crate::server::chat_request::ParsedChat;
use crate::server::request_logging::PendingLog;
use crate::server::streaming::{self, OutputPart, StreamContext, StreamFramer, Usage};
use crate::server::util::read_json_body;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One wire protocol's half of the pipeline.
pub trait ChatProtocol {
    const FORMAT: ApiFormat;
    type Framer: StreamFramer;

    fn parse(body: Value) -> Result<ParsedChat, GatewayError>;
    fn framer(model: &ChatModel, parsed: &ParsedChat, input_tokens: u32) -> Self::Framer;
    /// Text of the non-streaming body, the exact string output tokens are counted on.
    fn output_text(collected: &Collected) -> String;
    fn render(collected: &Collected, model: &ChatModel, usage: Usage) -> Value;
}

/// Fully drained response. Adjacent text (and thinking) parts are coalesced.
#[derive(Debug, Default)]
pub struct Collected {
    pub parts: Vec<OutputPart>,
}

impl Collected {
    pub fn push(&mut self, part: OutputPart) {
        let part = match (self.parts.last_mut(), part) {
            (Some(OutputPart::Text(acc)), OutputPart::Text(t))
            | (Some(OutputPart::Thinking(acc)), OutputPart::Thinking(t)) => {
                acc.push_str(&t);
                return;
            }
            (_, part) => part,
        };
        self.parts.push(part);
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                OutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn thinking(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                OutputPart::Thinking(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, OutputPart::ToolUse { .. }))
    }
}

/// Resolves the binding's model against the live registry.
pub fn bound_model(state: &AppState, binding: &ApiKeyBinding) -> Result<ChatModel, GatewayError> {
    state
        .bridge
        .find_model(&binding.model_id)
        .ok_or_else(|| GatewayError::ModelUnavailable(binding.model_id.clone()))
}

pub fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub async fn run_chat<P: ChatProtocol>(
    state: Arc<AppState>,
    binding: ApiKeyBinding,
    body: Body,
) -> Response {
    // 读体失败发生在处理器之前，不记日志
    let value = match read_json_body(body, state.config.server.max_body_bytes).await {
        Ok(v) => v,
        Err(e) => return e.with_format(P::FORMAT).into_response(),
    };

    let pending = PendingLog::start(
        state.log_sink.clone(),
        P::FORMAT,
        &binding,
        state.config.logging.max_content_chars,
    );
    let request_id = pending.request_id().to_string();
    let span = tracing::info_span!(
        "chat",
        request_id = %request_id,
        format = %P::FORMAT,
        model = %binding.model_id,
    );
    let response = handle::<P>(state, binding, value, pending)
        .instrument(span)
        .await;
    with_request_id(response, &request_id)
}

async fn handle<P: ChatProtocol>(
    state: Arc<AppState>,
    binding: ApiKeyBinding,
    value: Value,
    mut pending: PendingLog,
) -> Response {
    let prepared =
        P::parse(value).and_then(|parsed| Ok((parsed, bound_model(&state, &binding)?)));
    let (parsed, model) = match prepared {
        Ok(p) => p,
        Err(e) => return fail::<P>(pending, e).await,
    };

    pending.set_model(&model.id);
    let input_tokens = state.bridge.count_tokens(&model, &parsed.input_text).await;
    pending.set_input(&parsed.input_text, input_tokens);

    let cancel = CancellationToken::new();
    // 非流式：处理器 future 被丢弃即取消上游
    let guard = cancel.clone().drop_guard();
    let framer = P::framer(&model, &parsed, input_tokens);
    let stream = parsed.stream;

    let parts = match state
        .bridge
        .send_request(&model, parsed.messages, parsed.options, cancel.clone())
        .await
    {
        Ok(parts) => parts,
        Err(e) => return fail::<P>(pending, e.into()).await,
    };

    if stream {
        tracing::debug!("Streaming response");
        // 流式响应由 body 持有取消守卫
        let _ = guard.disarm();
        return streaming::sse_response(
            framer,
            parts,
            StreamContext {
                bridge: state.bridge.clone(),
                model,
                input_tokens,
                pending,
                cancel,
            },
        );
    }

    let response = respond::<P>(&state, &model, parts, input_tokens, pending).await;
    drop(guard);
    response
}

async fn respond<P: ChatProtocol>(
    state: &AppState,
    model: &ChatModel,
    mut parts: PartSequence,
    input_tokens: u32,
    mut pending: PendingLog,
) -> Response {
    let mut collected = Collected::default();
    loop {
        match parts.next().await {
            PartEvent::Part(part) => {
                let part = OutputPart::from(part);
                if let OutputPart::Text(t) = &part {
                    pending.push_output(t);
                }
                collected.push(part);
            }
            PartEvent::Ended => break,
            PartEvent::Failed(e) => return fail::<P>(pending, e.into()).await,
            // 客户端断开时整个 future 已被丢弃，走不到这里；只剩上游自行取消
            PartEvent::Cancelled => {
                let err = GatewayError::Internal("provider cancelled the request".into());
                return fail::<P>(pending, err).await;
            }
        }
    }

    let text = P::output_text(&collected);
    let output_tokens = state.bridge.count_tokens(model, &text).await;
    pending.set_output(&text, output_tokens);
    let body = P::render(
        &collected,
        model,
        Usage {
            input_tokens,
            output_tokens,
        },
    );
    pending.succeed().await;
    Json(body).into_response()
}

async fn fail<P: ChatProtocol>(pending: PendingLog, err: GatewayError) -> Response {
    pending.fail(err.to_string()).await;
    err.with_format(P::FORMAT).into_response()
}
