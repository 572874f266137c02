use std::collections::HashSet;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BindingConfig;
use crate::error::GatewayError;

use super::AuthManager;

/// One API key scoped to exactly one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyBinding {
    pub id: String,
    pub api_key: String,
    pub model_id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

pub trait BindingStore: Send + Sync {
    fn bindings(&self) -> &[ApiKeyBinding];

    /// The binding whose key the request presents, if any.
    fn binding_for_request(&self, headers: &HeaderMap) -> Option<ApiKeyBinding> {
        // 遍历全部绑定，不提前退出
        let mut found = None;
        for binding in self.bindings() {
            if AuthManager::validate_request(headers, &binding.api_key) && found.is_none() {
                found = Some(binding.clone());
            }
        }
        found
    }
}

/// Bindings fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticBindingStore {
    bindings: Vec<ApiKeyBinding>,
}

impl StaticBindingStore {
    pub fn new(bindings: Vec<ApiKeyBinding>) -> Self {
        Self { bindings }
    }

    /// Builds the store from config. Bindings without a key get a generated one; those are
    /// returned alongside so the caller can announce them.
    pub fn from_config(configs: &[BindingConfig]) -> Result<(Self, Vec<ApiKeyBinding>), GatewayError> {
        let now = Utc::now();
        let mut bindings = Vec::with_capacity(configs.len());
        let mut generated = Vec::new();
        let mut seen_keys = HashSet::new();

        for (i, cfg) in configs.iter().enumerate() {
            let model_id = cfg.model_id.trim();
            if model_id.is_empty() {
                return Err(GatewayError::Config(format!(
                    "binding #{} has an empty model_id",
                    i + 1
                )));
            }
            let (api_key, was_generated) = match cfg.api_key.as_deref().map(str::trim) {
                Some(k) if !k.is_empty() => (k.to_string(), false),
                _ => (AuthManager::generate_key(), true),
            };
            if !seen_keys.insert(api_key.clone()) {
                return Err(GatewayError::Config(format!(
                    "binding #{} reuses an API key already bound to another model",
                    i + 1
                )));
            }
            let binding = ApiKeyBinding {
                id: cfg
                    .id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                api_key,
                model_id: model_id.to_string(),
                label: cfg.label.clone().unwrap_or_default(),
                created_at: cfg.created_at.unwrap_or(now),
            };
            if was_generated {
                generated.push(binding.clone());
            }
            bindings.push(binding);
        }

        Ok((Self::new(bindings), generated))
    }
}

impl BindingStore for StaticBindingStore {
    fn bindings(&self) -> &[ApiKeyBinding] {
        &self.bindings
    }
}
