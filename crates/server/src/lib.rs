pub mod auth;
pub mod dispatch;
pub mod handler;
pub mod streaming;

use relay_core::auth::AuthStore;
use relay_core::config::Config;
use relay_core::metrics::Metrics;
use relay_core::registry::ModelRegistry;
use relay_provider::ExecutorRegistry;
use relay_provider::routing::RoutingEngine;
use relay_translator::TranslatorRegistry;
use arc_swap::ArcSwap;
use axum::{Router, middleware as axum_mw};
use std::sync::{Arc, Mutex};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub store: Arc<AuthStore>,
    pub registry: Arc<ModelRegistry>,
    pub engine: Arc<RoutingEngine>,
    pub executors: Arc<ExecutorRegistry>,
    pub translators: Arc<TranslatorRegistry>,
    pub metrics: Arc<Metrics>,
    pub config_path: Arc<Mutex<String>>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit_bytes = state.config.load().body_limit_mb * 1024 * 1024;

    // Public routes — no auth required
    let public_routes = Router::new()
        .route("/health", axum::routing::get(handler::health::health))
        .route("/metrics", axum::routing::get(handler::health::metrics));

    // Management routes — validated writes swap the live config
    let management_routes = Router::new()
        .route(
            "/routing/mode",
            axum::routing::get(handler::admin::get_mode).put(handler::admin::put_mode),
        )
        .route(
            "/fallback/models",
            axum::routing::get(handler::admin::get_fallback_models)
                .put(handler::admin::put_fallback_models),
        )
        .route(
            "/fallback/chain",
            axum::routing::get(handler::admin::get_fallback_chain)
                .put(handler::admin::put_fallback_chain),
        )
        .route(
            "/provider-priority",
            axum::routing::get(handler::admin::get_provider_priority)
                .put(handler::admin::put_provider_priority),
        )
        .route(
            "/provider-priority/{model}",
            axum::routing::get(handler::admin::get_provider_priority_model)
                .put(handler::admin::put_provider_priority_model)
                .delete(handler::admin::delete_provider_priority_model),
        )
        .route(
            "/provider-order",
            axum::routing::get(handler::admin::get_provider_order)
                .put(handler::admin::put_provider_order),
        );

    // API routes — client auth required, body size limited
    let api_routes = Router::new()
        .route("/v1/models", axum::routing::get(handler::models::list_models))
        .route(
            "/v1/chat/completions",
            axum::routing::post(handler::chat_completions::chat_completions),
        )
        .route(
            "/v1/completions",
            axum::routing::post(handler::completions::completions),
        )
        .route(
            "/v1/messages",
            axum::routing::post(handler::messages::messages),
        )
        .route(
            "/v1/responses",
            axum::routing::post(handler::responses::responses),
        )
        .route(
            "/v1beta/models/{model_action}",
            axum::routing::post(handler::gemini::generate_content),
        )
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(management_routes)
        .merge(api_routes)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
