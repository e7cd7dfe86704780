/// Application routes configuration
use crate::handlers::{
    acknowledge_alert, get_chart, get_logs, get_view, health, pause_spacecraft,
    select_spacecraft, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Dashboard snapshot
        .route("/view", get(get_view))
        .route("/view/logs", get(get_logs))
        .route("/view/charts/:chart", get(get_chart))
        // Operator actions
        .route("/select/:spacecraft_id", post(select_spacecraft))
        .route("/alerts/:reason/ack", post(acknowledge_alert))
        .route("/spacecraft/pause", post(pause_spacecraft))
        .with_state(state)
}
