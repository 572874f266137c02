pub mod convert;
pub mod parts;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::providers::{ChatProvider, ProviderError};

pub use convert::{convert_anthropic_messages, convert_openai_messages};
pub use parts::{PartEvent, PartSequence};
pub use types::{
    ChatMessage, ChatModel, ContentPart, RequestOptions, Role, ToolChoice, ToolDefinition,
    ToolMode, ToolResultPart,
};

/// Token estimate used whenever the provider cannot count: `ceil(chars / 4)`.
pub fn fallback_token_count(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Immutable model index. Replaced wholesale on refresh, never patched.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<ChatModel>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn from_models(models: impl IntoIterator<Item = ChatModel>) -> Self {
        let mut registry = ModelRegistry::default();
        for model in models {
            let model = model.normalized();
            if registry.index.contains_key(&model.id) {
                continue;
            }
            registry.index.insert(model.id.clone(), registry.models.len());
            registry.models.push(model);
        }
        // family 仅在未被占用时作为别名，id 永远优先
        for (i, model) in registry.models.iter().enumerate() {
            registry.index.entry(model.family.clone()).or_insert(i);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Exact id, then exact family, then first case-insensitive substring hit on
    /// id / family / display name in registry order.
    pub fn find(&self, model_id: &str) -> Option<&ChatModel> {
        if model_id.is_empty() {
            return None;
        }
        if let Some(&i) = self.index.get(model_id) {
            return self.models.get(i);
        }
        let needle = model_id.to_lowercase();
        self.models.iter().find(|m| {
            m.id.to_lowercase().contains(&needle)
                || m.family.to_lowercase().contains(&needle)
                || m.display_name.to_lowercase().contains(&needle)
        })
    }
}

pub struct ModelBridge {
    provider: Arc<dyn ChatProvider>,
    registry: RwLock<Arc<ModelRegistry>>,
}

impl ModelBridge {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            registry: RwLock::new(Arc::new(ModelRegistry::default())),
        }
    }

    /// Current registry snapshot; stays valid even if a refresh swaps it out.
    pub fn snapshot(&self) -> Arc<ModelRegistry> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replaces the registry with the provider's current listing. On failure the old registry stays.
    pub async fn refresh_models(&self) -> Result<usize, ProviderError> {
        let models = self.provider.list_models().await?;
        let next = Arc::new(ModelRegistry::from_models(models));
        let count = next.len();
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = next;
        tracing::info!(models = count, "Model registry refreshed");
        Ok(count)
    }

    pub fn model_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn find_model(&self, model_id: &str) -> Option<ChatModel> {
        self.snapshot().find(model_id).cloned()
    }

    pub async fn count_tokens(&self, model: &ChatModel, text: &str) -> u32 {
        match self.provider.count_tokens(model, text).await {
            Ok(n) => n,
            Err(e) => {
                tracing::trace!(model = %model.id, "Falling back to estimated token count: {}", e);
                fallback_token_count(text)
            }
        }
    }

    pub async fn send_request(
        &self,
        model: &ChatModel,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
        cancel: CancellationToken,
    ) -> Result<PartSequence, ProviderError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            res = self.provider.send_request(model, messages, options, cancel.clone()) => res?,
        };
        Ok(PartSequence::new(stream, cancel))
    }
}
