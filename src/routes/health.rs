use axum::{extract::State, response::Json as ResponseJson, routing::get, Json, Router};

use crate::gateway::{Gateway, GatewayState};
use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> ResponseJson<HealthResponse> {
    let stats = state.gateway.stats();
    let response = HealthResponse {
        status: status_label(&state.gateway, stats.state).to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        gateway: stats,
    };

    Json(response)
}

/// Degraded exactly when admission would reject a new request
fn status_label(gateway: &Gateway, state: GatewayState) -> &'static str {
    match state {
        GatewayState::Running if gateway.is_saturated() => "degraded",
        GatewayState::Running => "ok",
        GatewayState::Idle => "idle",
        GatewayState::Stopped => "stopped",
    }
}
