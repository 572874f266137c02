//! Upstream provider speaking the OpenAI chat-completions protocol (OpenAI, vLLM,
//! Ollama, LiteLLM and friends).

pub mod stream;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use tokio_util::sync::CancellationToken;

use crate::bridge::{ChatMessage, ChatModel, RequestOptions};
use crate::config::ProviderConfig;
use crate::http_client;

use super::{ChatProvider, PartStream, ProviderError};
use stream::ChunkDecoder;
use types::{ModelListResponse, build_chat_request};

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    models_endpoint: Option<String>,
    request_timeout: Duration,
    static_models: Vec<ChatModel>,
}

/// Joins `path` (always starting with `/v1/`) onto `base`, tolerating a base that already
/// ends in `/v1`.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    match (base.ends_with("/v1"), path.strip_prefix("/v1")) {
        (true, Some(rest)) => format!("{}{}", base, rest),
        _ => format!("{}{}", base, path),
    }
}

fn status_error(status: StatusCode, body: String) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::PermissionDenied(message),
        _ => ProviderError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

async fn map_eventsource_error(err: reqwest_eventsource::Error) -> ProviderError {
    use reqwest_eventsource::Error as EsError;
    match err {
        EsError::InvalidStatusCode(status, resp) => {
            let body = resp.text().await.unwrap_or_default();
            status_error(status, body)
        }
        EsError::Transport(e) => ProviderError::Http(e),
        EsError::InvalidContentType(ct, _) => ProviderError::Decode(format!(
            "upstream did not return an event stream (content-type {:?})",
            ct
        )),
        other => ProviderError::Decode(other.to_string()),
    }
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self, ProviderError> {
        let request_timeout = Duration::from_secs(cfg.request_timeout_secs.max(1));
        let client = http_client::client_for_url(&cfg.base_url, request_timeout)?;
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
            models_endpoint: cfg.models_endpoint.clone(),
            request_timeout,
            static_models: cfg.models.clone(),
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Waits for the stream to open so status failures surface before any part is produced.
    /// Returns the first payload too if the upstream skipped straight to data.
    async fn open(
        &self,
        mut es: EventSource,
        cancel: &CancellationToken,
    ) -> Result<(EventSource, Option<String>), ProviderError> {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                es.close();
                return Err(ProviderError::Cancelled);
            }
            next = es.next() => next,
        };
        match next {
            Some(Ok(Event::Open)) | None => Ok((es, None)),
            Some(Ok(Event::Message(m))) => Ok((es, Some(m.data))),
            Some(Err(e)) => {
                es.close();
                Err(map_eventsource_error(e).await)
            }
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn list_models(&self) -> Result<Vec<ChatModel>, ProviderError> {
        if !self.static_models.is_empty() {
            return Ok(self.static_models.clone());
        }

        let url = self
            .models_endpoint
            .clone()
            .unwrap_or_else(|| join_url(&self.base_url, "/v1/models"));
        let response = self
            .authorize(self.client.get(&url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        let listing: ModelListResponse = response.json().await?;

        Ok(listing
            .data
            .into_iter()
            .map(|m| {
                let mut model = ChatModel::new(m.id);
                model.vendor = m.owned_by.unwrap_or_default();
                model.max_input_tokens = m.context_length.unwrap_or(0);
                model
            })
            .collect())
    }

    async fn send_request(
        &self,
        model: &ChatModel,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
        cancel: CancellationToken,
    ) -> Result<PartStream, ProviderError> {
        let url = join_url(&self.base_url, "/v1/chat/completions");
        let body = build_chat_request(&model.id, &messages, &options);
        tracing::debug!(model = %model.id, url = %url, "Sending upstream chat request");

        let es = self
            .authorize(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body)
            .eventsource()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let (mut es, first) = self.open(es, &cancel).await?;

        let parts = async_stream::try_stream! {
            let mut decoder = ChunkDecoder::new();
            if let Some(data) = first
                && data.trim() != "[DONE]"
            {
                for part in decoder.push(&data)? {
                    yield part;
                }
            }
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(m)) => {
                        if m.data.trim() == "[DONE]" {
                            break;
                        }
                        for part in decoder.push(&m.data)? {
                            yield part;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        es.close();
                        Err::<(), ProviderError>(map_eventsource_error(e).await)?;
                    }
                }
            }
            es.close();
            for part in decoder.flush() {
                yield part;
            }
        };
        Ok(Box::pin(parts))
    }

    async fn count_tokens(&self, _model: &ChatModel, _text: &str) -> Result<u32, ProviderError> {
        Err(ProviderError::Unsupported("token counting"))
    }
}
