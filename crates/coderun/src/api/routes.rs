//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::error::ApiError;
use super::handlers;
use super::state::AppState;
use super::ws;

pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.max_upload_bytes;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .route("/compile-code", post(handlers::compile_code))
        .route("/upload-image", post(handlers::upload_image))
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors)
        .layer(trace_layer)
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}
