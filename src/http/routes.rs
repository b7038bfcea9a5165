use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Largest chunk body accepted (64 MiB)
const MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route(
            "/recordings",
            post(handlers::start_session).get(handlers::list_sessions),
        )
        .route("/recordings/interrupted", get(handlers::interrupted_sessions))
        .route("/recordings/usage", get(handlers::storage_usage))
        .route("/recordings/cleanup", post(handlers::cleanup_sessions))
        .route(
            "/recordings/:session_id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/recordings/:session_id/status",
            put(handlers::update_status),
        )
        // Chunk ingestion and reassembly
        .route(
            "/recordings/:session_id/chunks/:index",
            put(handlers::save_chunk).layer(DefaultBodyLimit::max(MAX_CHUNK_BYTES)),
        )
        .route(
            "/recordings/:session_id/audio",
            get(handlers::assemble_recording),
        )
        .route(
            "/recordings/:session_id/integrity",
            get(handlers::inspect_session),
        )
        // Request logging; the capture front-end runs on another origin
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
