//! Test doubles shared by the unit tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::auth::{ApiKeyBinding, StaticBindingStore};
use crate::bridge::{ChatMessage, ChatModel, ContentPart, ModelBridge, RequestOptions};
use crate::config::Settings;
use crate::logging::sink::BoxFuture;
use crate::logging::{LogSink, ProxyLogEntry};
use crate::providers::{ChatProvider, PartStream, ProviderError};
use crate::server::AppState;

pub const TEST_KEY: &str = "sk-gw-test-key";
pub const TEST_MODEL: &str = "test-model";

#[derive(Debug, Clone)]
pub enum Step {
    Part(ContentPart),
    Fail(String),
}

#[derive(Debug, Clone, Copy)]
pub enum SendFailure {
    PermissionDenied,
    Upstream,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: RequestOptions,
}

/// Provider that plays back a fixed script of parts.
pub struct ScriptedProvider {
    models: Mutex<Vec<ChatModel>>,
    script: Vec<Step>,
    hang_after_script: bool,
    send_failure: Option<SendFailure>,
    native_counter: bool,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(models: Vec<ChatModel>) -> Self {
        Self {
            models: Mutex::new(models),
            script: Vec::new(),
            hang_after_script: false,
            send_failure: None,
            native_counter: false,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_parts(mut self, parts: Vec<ContentPart>) -> Self {
        self.script = parts.into_iter().map(Step::Part).collect();
        self
    }

    pub fn with_script(mut self, script: Vec<Step>) -> Self {
        self.script = script;
        self
    }

    /// After the script the stream never yields again.
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    pub fn failing_with(mut self, failure: SendFailure) -> Self {
        self.send_failure = Some(failure);
        self
    }

    /// Native counter: one token per whitespace-separated word.
    pub fn with_native_counter(mut self) -> Self {
        self.native_counter = true;
        self
    }

    pub fn set_models(&self, models: Vec<ChatModel>) {
        *self.models.lock().unwrap() = models;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn list_models(&self) -> Result<Vec<ChatModel>, ProviderError> {
        Ok(self.models.lock().unwrap().clone())
    }

    async fn send_request(
        &self,
        model: &ChatModel,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
        _cancel: CancellationToken,
    ) -> Result<PartStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(RecordedCall {
            model: model.id.clone(),
            messages,
            options,
        });
        match self.send_failure {
            Some(SendFailure::PermissionDenied) => {
                return Err(ProviderError::PermissionDenied("user has not granted access".into()));
            }
            Some(SendFailure::Upstream) => {
                return Err(ProviderError::Upstream {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            None => {}
        }
        let items = self.script.clone().into_iter().map(|s| match s {
            Step::Part(p) => Ok(p),
            Step::Fail(msg) => Err(ProviderError::Decode(msg)),
        });
        let base = stream::iter(items);
        if self.hang_after_script {
            Ok(Box::pin(base.chain(stream::pending())))
        } else {
            Ok(Box::pin(base))
        }
    }

    async fn count_tokens(&self, _model: &ChatModel, text: &str) -> Result<u32, ProviderError> {
        if self.native_counter {
            Ok(text.split_whitespace().count() as u32)
        } else {
            Err(ProviderError::Unsupported("token counting"))
        }
    }
}

#[derive(Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<ProxyLogEntry>>,
}

impl MemoryLogSink {
    pub fn entries(&self) -> Vec<ProxyLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Polls until at least `n` entries arrived, then returns them all.
    pub async fn wait_for(&self, n: usize) -> Vec<ProxyLogEntry> {
        for _ in 0..200 {
            let entries = self.entries();
            if entries.len() >= n {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.entries()
    }
}

impl LogSink for MemoryLogSink {
    fn append<'a>(&'a self, entry: ProxyLogEntry) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        })
    }

    fn read_entries<'a>(&'a self, date: NaiveDate) -> BoxFuture<'a, io::Result<Vec<ProxyLogEntry>>> {
        Box::pin(async move {
            Ok(self
                .entries()
                .into_iter()
                .filter(|e| e.timestamp.date_naive() == date)
                .collect())
        })
    }
}

pub fn test_model() -> ChatModel {
    ChatModel {
        id: TEST_MODEL.into(),
        display_name: "Test Model".into(),
        vendor: "test".into(),
        family: "test-family".into(),
        version: "1.0".into(),
        max_input_tokens: 128_000,
    }
}

pub fn test_binding(model_id: &str) -> ApiKeyBinding {
    ApiKeyBinding {
        id: "binding-1".into(),
        api_key: TEST_KEY.into(),
        model_id: model_id.into(),
        label: "dev laptop".into(),
        created_at: Utc::now(),
    }
}

pub fn test_settings() -> Settings {
    Settings::from_toml_str(
        r#"
        [provider]
        base_url = "http://127.0.0.1:9"

        [server]
        max_body_bytes = 4096
        "#,
    )
    .unwrap()
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub provider: Arc<ScriptedProvider>,
    pub sink: Arc<MemoryLogSink>,
}

/// App state with one binding (`TEST_KEY` → `bound_model`) and a refreshed registry.
pub async fn harness_with(provider: ScriptedProvider, bound_model: &str) -> Harness {
    let provider = Arc::new(provider);
    let sink = Arc::new(MemoryLogSink::default());
    let bridge = Arc::new(ModelBridge::new(provider.clone()));
    bridge.refresh_models().await.unwrap();
    let state = Arc::new(AppState {
        config: test_settings(),
        bridge,
        bindings: Arc::new(StaticBindingStore::new(vec![test_binding(bound_model)])),
        log_sink: sink.clone(),
    });
    Harness {
        state,
        provider,
        sink,
    }
}

pub async fn harness(provider: ScriptedProvider) -> Harness {
    harness_with(provider, TEST_MODEL).await
}
