use axum::{extract::State, response::Json as ResponseJson, routing::get, Json, Router};
use tracing::debug;

use crate::gateway::GatewayStats;
use crate::models::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/gateway/stats", get(gateway_stats))
        .with_state(state)
}

async fn gateway_stats(State(state): State<AppState>) -> ResponseJson<GatewayStats> {
    let stats = state.gateway.stats();
    debug!(
        processed = stats.processed,
        failed = stats.failed,
        depth = stats.current_depth,
        in_flight = stats.current_in_flight,
        "Gateway stats requested"
    );
    Json(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GatewayConfig};
    use crate::downstream::DownstreamError;
    use crate::gateway::{category, Gateway};
    use crate::types::RequestContext;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_stats_reports_completed_requests() {
        let gateway = Gateway::new(GatewayConfig::default());
        gateway.start().unwrap();
        for i in 0..3u32 {
            gateway
                .submit(
                    move || async move { Ok::<_, DownstreamError>(i) },
                    category::QUICK,
                    RequestContext::for_tenant("tenant-1", "lookup_customer"),
                    0,
                )
                .await
                .unwrap();
        }

        let app = router(AppState::new(gateway.clone(), Config::default()));
        let response = app
            .oneshot(Request::builder().uri("/api/gateway/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: GatewayStats = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.success_rate, 1.0);

        gateway.stop().await;
    }
}
