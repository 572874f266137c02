use std::io;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::bridge::convert::UNSUPPORTED_CONTENT;
use crate::bridge::{ChatModel, ContentPart, ModelBridge, PartEvent, PartSequence};
use crate::server::request_logging::{DISCONNECTED, PendingLog};

pub mod anthropic;
pub mod openai;

/// Content block kinds a response can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    Image,
}

impl BlockKind {
    /// Tool calls and images are emitted as whole blocks: start, delta, stop within one part.
    fn is_atomic(self) -> bool {
        matches!(self, BlockKind::ToolUse | BlockKind::Image)
    }
}

/// A response part after classification into something a block can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputPart {
    Text(String),
    Thinking(String),
    ToolUse { id: String, name: String, input: Value },
    Image { data: Vec<u8>, mime_type: String },
}

impl OutputPart {
    pub fn kind(&self) -> BlockKind {
        match self {
            OutputPart::Text(_) => BlockKind::Text,
            OutputPart::Thinking(_) => BlockKind::Thinking,
            OutputPart::ToolUse { .. } => BlockKind::ToolUse,
            OutputPart::Image { .. } => BlockKind::Image,
        }
    }
}

impl From<ContentPart> for OutputPart {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text(t) => OutputPart::Text(t),
            ContentPart::Thinking(t) => OutputPart::Thinking(t),
            ContentPart::ToolCall {
                call_id,
                name,
                input,
            } => OutputPart::ToolUse {
                id: call_id,
                name,
                input,
            },
            ContentPart::Data { bytes, mime_type } if mime_type.starts_with("image/") => {
                OutputPart::Image {
                    data: bytes,
                    mime_type,
                }
            }
            ContentPart::Data { mime_type, .. } => {
                OutputPart::Text(format!("[unsupported content: {}]", mime_type))
            }
            ContentPart::Unsupported(kind) if !kind.is_empty() => {
                OutputPart::Text(format!("[unsupported content: {}]", kind))
            }
            ContentPart::Unsupported(_) | ContentPart::ToolResult { .. } => {
                OutputPart::Text(UNSUPPORTED_CONTENT.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolUse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Protocol-specific SSE framing. The driver owns block bookkeeping; a framer only renders.
pub trait StreamFramer: Send + 'static {
    fn message_start(&mut self) -> Vec<Event>;
    fn block_start(&mut self, index: usize, part: &OutputPart) -> Vec<Event>;
    fn block_delta(&mut self, index: usize, part: &OutputPart) -> Vec<Event>;
    fn block_stop(&mut self, index: usize, kind: BlockKind) -> Vec<Event>;
    fn message_end(&mut self, finish: FinishReason, usage: Usage) -> Vec<Event>;
    /// Text a part contributes to the response body as this protocol renders it.
    fn visible_text(&self, part: &OutputPart) -> Option<String>;
}

/// Per-connection block state. Indices only grow; a new block opens only after the previous
/// one was stopped.
#[derive(Debug, Default)]
pub struct StreamState {
    open_block: Option<(BlockKind, usize)>,
    next_index: usize,
    output_text: String,
    saw_tool_call: bool,
}

impl StreamState {
    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    pub fn finish_reason(&self) -> FinishReason {
        if self.saw_tool_call {
            FinishReason::ToolUse
        } else {
            FinishReason::Stop
        }
    }

    /// Events for one part, including whatever block transitions it forces.
    pub fn advance<F: StreamFramer + ?Sized>(&mut self, framer: &mut F, part: &OutputPart) -> Vec<Event> {
        let kind = part.kind();
        let mut events = Vec::new();

        if let Some(text) = framer.visible_text(part) {
            self.output_text.push_str(&text);
        }
        if kind == BlockKind::ToolUse {
            self.saw_tool_call = true;
        }

        let index = match self.open_block {
            Some((open, index)) if open == kind && !kind.is_atomic() => index,
            _ => {
                events.extend(self.close(framer));
                let index = self.next_index;
                self.next_index += 1;
                self.open_block = Some((kind, index));
                events.extend(framer.block_start(index, part));
                index
            }
        };
        events.extend(framer.block_delta(index, part));
        if kind.is_atomic() {
            events.extend(self.close(framer));
        }
        events
    }

    /// Stops the open block, if any.
    pub fn close<F: StreamFramer + ?Sized>(&mut self, framer: &mut F) -> Vec<Event> {
        match self.open_block.take() {
            Some((kind, index)) => framer.block_stop(index, kind),
            None => Vec::new(),
        }
    }
}

pub struct StreamContext {
    pub bridge: Arc<ModelBridge>,
    pub model: ChatModel,
    pub input_tokens: u32,
    pub pending: PendingLog,
    pub cancel: CancellationToken,
}

enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Body items: an `Err` makes hyper abort the connection instead of ending the body cleanly.
type SseItem = Result<Event, axum::Error>;

fn emit(tx: &UnboundedSender<SseItem>, events: Vec<Event>) -> bool {
    events.into_iter().all(|e| tx.send(Ok(e)).is_ok())
}

/// Spawns the stream driver and returns the SSE response feeding from it. Dropping the
/// response body (client disconnect) cancels the provider call.
pub fn sse_response<F: StreamFramer>(framer: F, parts: PartSequence, ctx: StreamContext) -> Response {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<SseItem>();
    let guard = ctx.cancel.clone().drop_guard();
    tokio::spawn(drive(framer, parts, ctx, tx));

    let out_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
        move |item| {
            let _alive = &guard;
            item
        },
    );
    Sse::new(out_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn drive<F: StreamFramer>(
    mut framer: F,
    mut parts: PartSequence,
    ctx: StreamContext,
    tx: UnboundedSender<SseItem>,
) {
    let StreamContext {
        bridge,
        model,
        input_tokens,
        mut pending,
        cancel,
    } = ctx;
    let mut state = StreamState::default();

    let outcome = 'run: {
        if !emit(&tx, framer.message_start()) {
            break 'run Outcome::Cancelled;
        }
        loop {
            match parts.next().await {
                PartEvent::Part(part) => {
                    let part = OutputPart::from(part);
                    let before = state.output_text().len();
                    let events = state.advance(&mut framer, &part);
                    pending.push_output(&state.output_text()[before..]);
                    if !emit(&tx, events) {
                        break 'run Outcome::Cancelled;
                    }
                }
                PartEvent::Ended => break 'run Outcome::Completed,
                PartEvent::Failed(e) => break 'run Outcome::Failed(e.to_string()),
                PartEvent::Cancelled => break 'run Outcome::Cancelled,
            }
        }
    };
    // 无论结果如何都不再拉取上游
    cancel.cancel();
    drop(parts);

    let output_tokens = bridge.count_tokens(&model, state.output_text()).await;
    pending.set_output(state.output_text(), output_tokens);

    match outcome {
        Outcome::Completed => {
            let mut events = state.close(&mut framer);
            events.extend(framer.message_end(
                state.finish_reason(),
                Usage {
                    input_tokens,
                    output_tokens,
                },
            ));
            emit(&tx, events);
            pending.succeed().await;
        }
        Outcome::Failed(message) => {
            // 响应头已发出，只能中断连接
            tracing::warn!(model = %model.id, "Provider failed mid-stream: {}", message);
            let _ = tx.send(Err(axum::Error::new(io::Error::other(message.clone()))));
            drop(tx);
            pending.fail(message).await;
        }
        Outcome::Cancelled => {
            tracing::info!(model = %model.id, "Client disconnected mid-stream");
            pending.fail(DISCONNECTED).await;
        }
    }
}
