use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::AuthManager;
use crate::error::GatewayError;
use crate::logging::ApiFormat;
use crate::server::AppState;

pub const HEALTH_PATH: &str = "/health";
pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization, x-api-key, anthropic-version";

/// Answers every `OPTIONS` request with 204 and the CORS headers, before auth or routing.
pub async fn preflight(req: Request, next: Next) -> Response {
    if req.method() != Method::OPTIONS {
        return next.run(req).await;
    }
    let mut resp = StatusCode::NO_CONTENT.into_response();
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    resp
}

/// Resolves the caller's binding and hands it to the handlers as a request extension.
/// Runs ahead of routing, so unknown paths are rejected with 401 too when unauthenticated.
pub async fn require_binding(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == HEALTH_PATH {
        return next.run(req).await;
    }

    let format = ApiFormat::for_path(req.uri().path());
    let Some(binding) = state.bindings.binding_for_request(req.headers()) else {
        let message = if AuthManager::extract_key(req.headers()).is_some() {
            "Invalid API key"
        } else {
            "Missing API key: send 'Authorization: Bearer <key>' or 'x-api-key: <key>'"
        };
        tracing::debug!(path = %req.uri().path(), "Rejected unauthenticated request");
        return GatewayError::Unauthorized(message.into())
            .with_format(format)
            .into_response();
    };

    req.extensions_mut().insert(binding);
    next.run(req).await
}
