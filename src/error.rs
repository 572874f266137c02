use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::logging::ApiFormat;
use crate::providers::ProviderError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Request body exceeds the limit of {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Model '{0}' is not currently available")]
    ModelUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<ProviderError> for GatewayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::PermissionDenied(msg) => GatewayError::PermissionDenied(msg),
            other => GatewayError::Provider(other.to_string()),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::Provider(_)
            | GatewayError::Internal(_)
            | GatewayError::Io(_)
            | GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, used as `error.code` in OpenAI envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "invalid_request",
            GatewayError::Json(_) => "invalid_json",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::Unauthorized(_) => "invalid_api_key",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::ModelUnavailable(_) => "model_not_found",
            GatewayError::PermissionDenied(_) => "permission_denied",
            GatewayError::Provider(_) => "provider_error",
            GatewayError::Internal(_) | GatewayError::Io(_) | GatewayError::Config(_) => {
                "internal_error"
            }
        }
    }

    pub fn error_type(&self, format: ApiFormat) -> &'static str {
        match (format, self) {
            (_, GatewayError::BadRequest(_) | GatewayError::Json(_)) => "invalid_request_error",
            (ApiFormat::OpenAi, GatewayError::PayloadTooLarge(_)) => "invalid_request_error",
            (ApiFormat::Anthropic, GatewayError::PayloadTooLarge(_)) => "request_too_large",
            (_, GatewayError::Unauthorized(_)) => "authentication_error",
            (ApiFormat::OpenAi, GatewayError::NotFound(_)) => "not_found_error",
            (ApiFormat::Anthropic, GatewayError::NotFound(_)) => "not_found_error",
            (ApiFormat::OpenAi, GatewayError::ModelUnavailable(_)) => "service_unavailable",
            (ApiFormat::Anthropic, GatewayError::ModelUnavailable(_)) => "overloaded_error",
            (_, GatewayError::PermissionDenied(_)) => "permission_error",
            (ApiFormat::OpenAi, _) => "server_error",
            (ApiFormat::Anthropic, _) => "api_error",
        }
    }

    pub fn envelope(&self, format: ApiFormat) -> Value {
        let message = self.to_string();
        match format {
            ApiFormat::OpenAi => json!({
                "error": {
                    "message": message,
                    "type": self.error_type(format),
                    "code": self.code(),
                }
            }),
            ApiFormat::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": self.error_type(format),
                    "message": message,
                }
            }),
        }
    }

    pub fn with_format(self, format: ApiFormat) -> ApiError {
        ApiError {
            format,
            error: self,
        }
    }
}

/// A `GatewayError` bound to the protocol whose envelope it must be rendered in.
#[derive(Debug)]
pub struct ApiError {
    pub format: ApiFormat,
    pub error: GatewayError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        if status.is_server_error() {
            tracing::error!(format = %self.format, "{}", self.error);
        } else {
            tracing::debug!(format = %self.format, status = status.as_u16(), "{}", self.error);
        }
        (status, Json(self.error.envelope(self.format))).into_response()
    }
}
