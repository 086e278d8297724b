use crate::config::Config;
use crate::gateway::{Gateway, GatewayStats};

/// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub config: Config,
}

impl AppState {
    pub fn new(gateway: Gateway, config: Config) -> Self {
        Self { gateway, config }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub gateway: GatewayStats,
}
