//! HTTP adapter for the downstream invoicing API
//!
//! Wraps `reqwest` and maps every transport or status failure onto a
//! [`DownstreamError`] variant. The adapter never parses invoicing payloads;
//! bodies are passed through as `serde_json::Value`.

use std::time::Duration;

use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::DownstreamError;
use crate::config::DownstreamConfig;

const TENANT_HEADER: &str = "X-Tenant-Id";

/// Thin client for the downstream invoicing API
#[derive(Debug, Clone)]
pub struct InvoicingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl InvoicingClient {
    /// Create a new client with a per-request transport timeout
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, DownstreamError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DownstreamError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Configure client from config
    pub fn from_config(config: &DownstreamConfig) -> Result<Self, DownstreamError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON resource
    pub async fn get_json(&self, tenant_id: Option<&str>, path: &str) -> Result<Value, DownstreamError> {
        let request = self.http.get(self.url(path));
        self.send(self.decorate(request, tenant_id)).await
    }

    /// POST a JSON body and return the JSON response
    pub async fn post_json(
        &self,
        tenant_id: Option<&str>,
        path: &str,
        body: &Value,
    ) -> Result<Value, DownstreamError> {
        let request = self.http.post(self.url(path)).json(body);
        self.send(self.decorate(request, tenant_id)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn decorate(&self, request: RequestBuilder, tenant_id: Option<&str>) -> RequestBuilder {
        let mut request = request.header(header::ACCEPT, "application/json");
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        if let Some(tenant) = tenant_id {
            request = request.header(TENANT_HEADER, tenant);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, DownstreamError> {
        let response = request.send().await.map_err(|e| classify_transport_error(&e))?;
        let status = response.status();
        debug!(status = %status, url = %response.url(), "Downstream response received");

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| classify_transport_error(&e));
        }

        Err(status_error(response).await)
    }
}

/// Map a non-success response onto a downstream error
async fn status_error(response: Response) -> DownstreamError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return DownstreamError::RateLimited { retry_after_secs };
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => DownstreamError::Validation(body),
        _ => DownstreamError::Rejected {
            status: status.as_u16(),
            body,
        },
    }
}

/// Map a reqwest transport failure onto a downstream error.
///
/// Connect failures that don't name a more specific cause are reported as
/// refused connections; decode failures are permanent.
pub fn classify_transport_error(err: &reqwest::Error) -> DownstreamError {
    let message = error_chain(err);

    if err.is_timeout() {
        return DownstreamError::Timeout(message);
    }
    if err.is_decode() {
        return DownstreamError::Other(format!("Invalid response body: {}", message));
    }

    let by_message = DownstreamError::from_message(message.clone());
    if by_message.is_transient() {
        by_message
    } else if err.is_connect() {
        DownstreamError::ConnectionRefused(message)
    } else if err.is_request() || err.is_body() {
        DownstreamError::SocketHangUp(message)
    } else {
        by_message
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(url: String) -> InvoicingClient {
        InvoicingClient::new(url, "test-key", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_json_sends_auth_and_tenant_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/products/sku-1")
            .match_header("authorization", "Bearer test-key")
            .match_header("x-tenant-id", "tenant-7")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"sku":"sku-1","price":1250}"#)
            .create_async()
            .await;

        let body = client(server.url())
            .get_json(Some("tenant-7"), "/products/sku-1")
            .await
            .unwrap();

        assert_eq!(body["price"], 1250);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_json_validation_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoices")
            .with_status(422)
            .with_body("receiver tax id is invalid")
            .create_async()
            .await;

        let err = client(server.url())
            .post_json(None, "invoices", &json!({"lines": []}))
            .await
            .unwrap_err();

        assert_eq!(err, DownstreamError::Validation("receiver tax id is invalid".to_string()));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/customers")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let err = client(server.url()).get_json(None, "customers").await.unwrap_err();
        assert_eq!(err, DownstreamError::RateLimited { retry_after_secs: Some(7) });
    }

    #[tokio::test]
    async fn test_server_error_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/customers")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client(server.url()).get_json(None, "customers").await.unwrap_err();
        assert_eq!(err, DownstreamError::Rejected { status: 500, body: "boom".to_string() });
    }

    #[tokio::test]
    async fn test_no_content_is_null() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoices/9/cancel")
            .with_status(204)
            .create_async()
            .await;

        let body = client(server.url())
            .post_json(None, "invoices/9/cancel", &json!({}))
            .await
            .unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        // Port 1 is reserved and nothing listens on it
        let err = client("http://127.0.0.1:1".to_string())
            .get_json(None, "health")
            .await
            .unwrap_err();
        assert!(err.is_transient(), "expected transient error, got {:?}", err);
    }
}
