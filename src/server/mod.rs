pub mod auth_gate;
pub mod chat;
pub mod chat_request;
pub mod handlers;
pub mod request_logging;
pub mod streaming;
pub(crate) mod util;


use crate::auth::{BindingStore, StaticBindingStore};
use crate::bridge::ModelBridge;
use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::logging::{JsonlLogSink, LogSink};
use crate::providers::OpenAiCompatProvider;
use axum::Router;
use axum::http::{HeaderName, Method, header};
use axum::middleware;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Everything a request may touch. Built once by [`create_app`]; no global state.
#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub bridge: Arc<ModelBridge>,
    pub bindings: Arc<dyn BindingStore>,
    pub log_sink: Arc<dyn LogSink>,
}

/// Composition root: provider → bridge → bindings / log sink → router.
pub async fn create_app(config: Settings) -> AppResult<Router> {
    let provider = OpenAiCompatProvider::from_config(&config.provider)?;
    let bridge = Arc::new(ModelBridge::new(Arc::new(provider)));
    if let Err(e) = bridge.refresh_models().await {
        tracing::warn!(
            "Could not list models from {}: {}; starting with an empty registry",
            config.provider.base_url,
            e
        );
    } else if bridge.snapshot().is_empty() {
        tracing::warn!("Upstream {} lists no models", config.provider.base_url);
    }

    let (bindings, generated) = StaticBindingStore::from_config(&config.bindings)?;
    for b in &generated {
        tracing::warn!(
            binding = %b.id,
            model = %b.model_id,
            "Generated API key for binding '{}': {}",
            b.label,
            b.api_key
        );
    }
    if bindings.bindings().is_empty() {
        tracing::warn!("No [[bindings]] configured; every authenticated route will answer 401");
    }
    for b in bindings.bindings() {
        if bridge.find_model(&b.model_id).is_none() {
            tracing::warn!(
                key = %util::mask_key(&b.api_key),
                "Bound model '{}' is not in the registry; requests will get 503 until it appears",
                b.model_id
            );
        }
    }

    let log_sink = JsonlLogSink::new(&config.logging.dir)?;
    log_startup_summary(&log_sink).await;

    let state = Arc::new(AppState {
        config,
        bridge,
        bindings: Arc::new(bindings),
        log_sink: Arc::new(log_sink),
    });
    Ok(router(state))
}

async fn log_startup_summary(sink: &JsonlLogSink) {
    let dates = match sink.list_dates().await {
        Ok(dates) => dates,
        Err(e) => {
            tracing::warn!("Cannot list request logs in {}: {}", sink.dir().display(), e);
            return;
        }
    };
    let Some(latest) = dates.first().copied() else {
        tracing::info!("Request log: {} (empty)", sink.dir().display());
        return;
    };
    match sink.stats(latest).await {
        Ok(stats) => tracing::info!(
            partitions = dates.len(),
            date = %latest,
            requests = stats.total_requests,
            errors = stats.error_count,
            "Request log: {}",
            sink.dir().display()
        ),
        Err(e) => tracing::warn!("Cannot read request log for {}: {}", latest, e),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    // CORS：仅供本机开发工具使用，来源放开
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("anthropic-version"),
        ])
        .expose_headers([HeaderName::from_static(chat::REQUEST_ID_HEADER)]);

    handlers::routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_gate::require_binding,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(auth_gate::preflight))
}
