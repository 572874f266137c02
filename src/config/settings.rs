use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bridge::ChatModel;
use crate::error::GatewayError;

pub const CONFIG_ENV: &str = "GATEWAY_CONFIG";
pub const UPSTREAM_KEY_ENV: &str = "UPSTREAM_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Upstream OpenAI-compatible endpoint backing the model registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models_endpoint: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Static descriptors; when empty the registry is fetched from the upstream.
    #[serde(default)]
    pub models: Vec<ChatModel>,
}

fn default_request_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub max_content_chars: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "data/logs".to_string(),
            max_content_chars: 20_000,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, GatewayError> {
        let config_path = Self::find_config_file()?;
        let config_content = std::fs::read_to_string(&config_path)?;
        tracing::info!("Loading configuration from {}", config_path);
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, GatewayError> {
        let mut settings: Settings =
            toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;

        if settings.provider.api_key.as_deref().is_none_or(str::is_empty)
            && let Ok(key) = std::env::var(UPSTREAM_KEY_ENV)
            && !key.trim().is_empty()
        {
            settings.provider.api_key = Some(key.trim().to_string());
        }
        if settings.provider.base_url.trim().is_empty() {
            return Err(GatewayError::Config("provider.base_url must not be empty".into()));
        }
        for model in &settings.provider.models {
            if model.id.trim().is_empty() {
                return Err(GatewayError::Config("provider.models entries need an id".into()));
            }
        }

        Ok(settings)
    }

    fn find_config_file() -> Result<String, GatewayError> {
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Ok(path);
        }

        let possible_names = ["custom-config.toml", "config.toml"];
        for name in &possible_names {
            if Path::new(name).exists() {
                return Ok(name.to_string());
            }
        }

        Err(GatewayError::Config(
            "Configuration file not found. Please create custom-config.toml or config.toml".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let s = Settings::from_toml_str(
            r#"
            [provider]
            base_url = "http://localhost:8080"
            api_key = "upstream"
            "#,
        )
        .unwrap();
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.server.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(s.logging.dir, "data/logs");
        assert!(s.bindings.is_empty());
        assert!(s.provider.models.is_empty());
        assert_eq!(s.provider.request_timeout_secs, 600);
    }

    #[test]
    fn full_config_parses_models_and_bindings() {
        let s = Settings::from_toml_str(
            r#"
            [server]
            port = 4000

            [provider]
            base_url = "http://localhost:8080"
            api_key = "upstream"

            [[provider.models]]
            id = "gpt-4o-2024-08-06"
            family = "gpt-4o"
            vendor = "openai"
            max_input_tokens = 128000

            [[bindings]]
            api_key = "sk-gw-1"
            model_id = "gpt-4o"
            label = "editor"

            [logging]
            dir = "/tmp/gw"
            "#,
        )
        .unwrap();
        assert_eq!(s.server.port, 4000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.provider.models[0].family, "gpt-4o");
        assert_eq!(s.provider.models[0].display_name, "");
        assert_eq!(s.bindings[0].model_id, "gpt-4o");
        assert_eq!(s.logging.dir, "/tmp/gw");
        assert_eq!(s.logging.max_content_chars, 20_000);
    }

    #[test]
    fn blank_base_url_is_a_config_error() {
        let err = Settings::from_toml_str("[provider]\nbase_url = \"\"\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
