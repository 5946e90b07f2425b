//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws;

use super::handlers;
use super::state::AppState;

/// Create the application router.
///
/// Everything is wide open — any origin, method, header. The relay is a
/// private single-tenant service that is expected to sit behind its own
/// network boundary, and the operator clients (headset, chat webhook)
/// connect from origins we do not control.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/", get(handlers::banner))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/image", get(handlers::image))
        .route("/api/whatsapp", post(handlers::whatsapp))
        // WebSocket ingress
        .route("/robot", get(ws::robot::robot_ws_handler))
        .route("/unity", get(ws::operator::operator_ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}
