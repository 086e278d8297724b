//! Product catalog lookups against the invoicing API, as a batch step

use async_trait::async_trait;
use serde_json::Value;

use super::enricher::ItemEnricher;
use crate::config::DownstreamConfig;
use crate::downstream::{DownstreamError, InvoicingClient};
use crate::gateway::category;
use crate::types::RequestContext;

/// Resolves SKUs to the provider's product records for one tenant
#[derive(Debug, Clone)]
pub struct CatalogLookup {
    client: InvoicingClient,
    tenant_id: String,
}

impl CatalogLookup {
    pub fn new(client: InvoicingClient, tenant_id: impl Into<String>) -> Self {
        Self {
            client,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn from_config(config: &DownstreamConfig, tenant_id: impl Into<String>) -> Result<Self, DownstreamError> {
        Ok(Self::new(InvoicingClient::from_config(config)?, tenant_id))
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

#[async_trait]
impl ItemEnricher for CatalogLookup {
    type Item = String;
    type Output = Value;

    fn category(&self) -> &str {
        category::QUICK
    }

    fn context(&self, _sku: &String) -> RequestContext {
        RequestContext::for_tenant(self.tenant_id.clone(), "lookup_product")
    }

    async fn enrich(&self, sku: String) -> Result<Value, DownstreamError> {
        self.client
            .get_json(Some(&self.tenant_id), &format!("products/{}", sku))
            .await
    }
}
