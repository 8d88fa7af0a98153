//! API route definitions.

use std::path::PathBuf;

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws::ws_handler;

use super::handlers;
use super::sse;
use super::state::AppState;

/// Router-level options that are not part of the handler state.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Origins allowed for cross-origin browser requests.
    pub cors_origins: Vec<String>,
    /// Built frontend served for every non-API path.
    pub static_dir: Option<PathBuf>,
}

/// Create the application router.
pub fn create_router(state: AppState, options: RouterOptions) -> Router {
    let cors = build_cors_layer(&options.cors_origins);

    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api_routes = Router::new()
        .route("/config/index-id", get(handlers::get_index_id))
        // Processing sessions
        .route("/process/init", post(handlers::init_process))
        .route("/process", post(handlers::process))
        // Delivery endpoints
        .route("/stream", get(sse::stream_updates))
        .route("/ws/{thread_id}", get(ws_handler))
        // Thin Jockey proxies
        .route("/jockey/assistants", get(handlers::list_assistants))
        .route("/jockey/thread", post(handlers::create_thread))
        .route("/jockey/runs", get(handlers::list_runs))
        .route(
            "/jockey/video/{index_id}/{filename}",
            get(handlers::get_video),
        )
        .fallback(handlers::not_found);

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api_routes);

    if let Some(dir) = options.static_dir {
        tracing::info!("Serving frontend from {}", dir.display());
        let index = dir.join("index.html");
        router = router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    router.layer(trace_layer).layer(cors).with_state(state)
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS: No valid origins configured, denying cross-origin requests");
        CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")))
    } else {
        tracing::info!("CORS: Allowing {} origin(s)", origins.len());
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
    }
}
