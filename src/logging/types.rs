use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire protocol a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl ApiFormat {
    // Anthropic 路由之外的请求（含 404）统一使用 OpenAI 风格的错误体
    pub fn for_path(path: &str) -> Self {
        if path.starts_with("/v1/messages") {
            ApiFormat::Anthropic
        } else {
            ApiFormat::OpenAi
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFormat::OpenAi => "openai",
            ApiFormat::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

/// One line of the request log. Written exactly once per request that reached a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyLogEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub format: ApiFormat,
    pub model: String,
    pub binding_id: String,
    pub binding_label: String,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub input_content: String,
    pub output_content: String,
}

/// Rollup over one date partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_duration_ms: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl LogStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ProxyLogEntry>) -> Self {
        let mut stats = LogStats::default();
        let mut total_duration: u64 = 0;
        for e in entries {
            stats.total_requests += 1;
            match e.status {
                LogStatus::Success => stats.success_count += 1,
                LogStatus::Error => stats.error_count += 1,
            }
            total_duration = total_duration.saturating_add(e.duration_ms);
            stats.total_input_tokens += u64::from(e.input_tokens);
            stats.total_output_tokens += u64::from(e.output_tokens);
        }
        if stats.total_requests > 0 {
            stats.average_duration_ms = total_duration as f64 / stats.total_requests as f64;
        }
        stats
    }
}
