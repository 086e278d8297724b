// Invoice Gateway - Outbound request gateway and batch enrichment for a multi-tenant invoicing assistant

pub mod config;
pub mod types;
pub mod downstream;  // Invoicing API error taxonomy and HTTP adapter
pub mod gateway;     // Admission, dispatch, timeouts and retries
pub mod batch;       // Chunked enrichment with progress reporting
pub mod models;
pub mod routes;
pub mod simulate;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use gateway::Gateway;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
