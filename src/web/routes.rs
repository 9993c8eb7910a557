use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::app_state::AppState;

use super::handlers;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route("/status", get(handlers::status))
        .route("/photo", post(handlers::photo))
        .route("/record/start", post(handlers::record_start))
        .route("/record/stop", post(handlers::record_stop))
        .route("/format/{name}", post(handlers::set_format))
        .route("/formats", get(handlers::formats))
        .route("/filter/{name}", post(handlers::set_filter))
        .route("/filters", get(handlers::filters));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/stream", get(handlers::stream))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .with_state(state)
}
