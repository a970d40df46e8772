//! API route modules.

pub mod health;
pub mod memory;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", memory::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
