//! Synthetic catalog enrichment for exercising the gateway end to end
//! without a live invoicing API.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::batch::{BatchEnricher, BatchSummary, ItemEnricher, LogSink, ProgressReporter};
use crate::config::Config;
use crate::downstream::DownstreamError;
use crate::gateway::{category, Gateway, GatewayStats};
use crate::types::RequestContext;

/// Product enriched with catalog data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub sku: String,
    pub product_key: String,
    pub unit_key: String,
}

/// Catalog lookup with random latency and transient connection resets
#[derive(Debug, Clone)]
pub struct SimulatedCatalog {
    pub tenant_id: String,
    /// Probability in `0.0..=1.0` that one attempt fails transiently
    pub failure_rate: f64,
    /// Upper bound of the random per-attempt latency
    pub max_latency: Duration,
}

impl Default for SimulatedCatalog {
    fn default() -> Self {
        Self {
            tenant_id: "demo-tenant".to_string(),
            failure_rate: 0.1,
            max_latency: Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl ItemEnricher for SimulatedCatalog {
    type Item = String;
    type Output = CatalogEntry;

    fn category(&self) -> &str {
        category::QUICK
    }

    fn context(&self, _sku: &String) -> RequestContext {
        RequestContext::for_tenant(self.tenant_id.clone(), "match_product_key")
    }

    async fn enrich(&self, sku: String) -> Result<CatalogEntry, DownstreamError> {
        let (latency, fails, product_code) = {
            let mut rng = rand::thread_rng();
            let max_ms = self.max_latency.as_millis() as u64;
            (
                Duration::from_millis(rng.gen_range(0..=max_ms)),
                rng.gen_bool(self.failure_rate.clamp(0.0, 1.0)),
                rng.gen_range(10_000_000..=99_999_999u32),
            )
        };

        tokio::time::sleep(latency).await;
        if fails {
            return Err(DownstreamError::ConnectionReset(format!("catalog lookup for {}", sku)));
        }
        Ok(CatalogEntry {
            sku,
            product_key: product_code.to_string(),
            unit_key: "H87".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub items: usize,
    pub chunk_size: usize,
    pub failure_rate: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub summary: BatchSummary,
    pub stats: GatewayStats,
}

/// Run one synthetic batch through a fresh gateway and stop it afterwards
pub async fn run_simulation(config: &Config, options: SimulationOptions) -> anyhow::Result<SimulationReport> {
    let gateway = Gateway::new(config.gateway.clone());
    gateway.start()?;

    let enricher = BatchEnricher::from_config(gateway.clone(), &config.batch);
    let catalog = Arc::new(SimulatedCatalog {
        failure_rate: options.failure_rate,
        max_latency: Duration::from_millis(options.latency_ms),
        ..SimulatedCatalog::default()
    });
    let items: Vec<String> = (0..options.items).map(|i| format!("SKU-{:05}", i)).collect();

    info!(
        items = options.items,
        chunk_size = options.chunk_size,
        chunked = enricher.should_batch(options.items),
        failure_rate = options.failure_rate,
        "Starting simulation"
    );

    let mut progress = ProgressReporter::new(Arc::new(LogSink), "simulation");
    let result = enricher
        .process(items, options.chunk_size, catalog, &mut progress)
        .await;

    gateway.stop().await;
    Ok(SimulationReport {
        summary: result.summary(),
        stats: gateway.stats(),
    })
}
