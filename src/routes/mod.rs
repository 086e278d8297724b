//! API Routes
//!
//! HTTP endpoints exposing gateway health to operators:
//! - `/api/health` - Liveness plus a gateway snapshot
//! - `/api/gateway/stats` - Raw gateway metrics

pub mod gateway;
pub mod health;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    Router::new()
        .merge(health::router(state.clone()))
        .merge(gateway::router(state))
        .layer(TraceLayer::new_for_http())
}
