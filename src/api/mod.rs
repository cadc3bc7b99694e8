use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/zones", get(handlers::get_zones))
        .route("/api/count", get(handlers::get_count))
        .route("/api/stop", post(handlers::post_stop))
        .route("/api/sessions", axum::routing::delete(handlers::delete_session))
        .route("/api/stream", get(handlers::get_stream))
        .route("/api/analyze", post(handlers::post_analyze))
        .route(
            "/api/history",
            get(handlers::get_history).delete(handlers::delete_history),
        )
        .route("/api/history.csv", get(handlers::get_history_csv))
        .with_state(state)
}
