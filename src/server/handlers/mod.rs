use axum::{
    Json, Router,
    extract::State,
    http::{Method, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::logging::ApiFormat;
use crate::server::AppState;

pub mod anthropic;
pub mod openai;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        // OpenAI style
        .route("/v1/models", get(openai::list_models))
        .route("/v1/models/{id}", get(openai::get_model))
        .route("/v1/chat/completions", post(openai::chat_completions))
        // Anthropic style
        .route("/v1/messages", post(anthropic::messages))
        .route("/v1/messages/count_tokens", post(anthropic::count_tokens))
        // 路由为精确匹配：未知路径与错误方法都按 404 处理
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "models": state.bridge.model_count(),
    }))
}

async fn not_found(method: Method, uri: Uri) -> Response {
    GatewayError::NotFound(format!("No route for {} {}", method, uri.path()))
        .with_format(ApiFormat::OpenAi)
        .into_response()
}
