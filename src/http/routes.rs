use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Capture control
        .route("/capture/start", post(handlers::start_capture))
        .route("/capture/stop/:tab_id", post(handlers::stop_capture))
        .route("/capture/stop-all", post(handlers::stop_all_capture))
        // Queries
        .route("/status", get(handlers::get_status))
        .route("/sessions", get(handlers::get_all_sessions))
        .route("/events", get(handlers::status_events))
        // Host lifecycle hooks
        .route("/tabs/:tab_id/removed", post(handlers::tab_removed))
        .route("/tabs/:tab_id/activated", post(handlers::tab_activated))
        .route("/suspend", post(handlers::suspend))
        // The observer UI lives in the browser
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
