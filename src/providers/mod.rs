pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::bridge::{ChatMessage, ChatModel, ContentPart, RequestOptions};

pub use openai::OpenAiCompatProvider;

/// Provider failure kinds. Permission denials are kept apart from everything else.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
}

/// Lazy, single-pass sequence of response parts.
pub type PartStream = Pin<Box<dyn Stream<Item = Result<ContentPart, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ChatModel>, ProviderError>;

    async fn send_request(
        &self,
        model: &ChatModel,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
        cancel: CancellationToken,
    ) -> Result<PartStream, ProviderError>;

    async fn count_tokens(&self, model: &ChatModel, text: &str) -> Result<u32, ProviderError>;
}
