//! HTTP client abstraction for the assistant call-out.
//!
//! This module provides a trait-based abstraction over HTTP clients, enabling
//! dependency injection and easy mocking in tests.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Status code and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for HTTP communication with external APIs.
///
/// This abstraction allows injecting mock HTTP clients for testing without
/// making real network requests.
///
/// # Example
///
/// ```ignore
/// use aegis::http_client::{HttpClient, ReqwestHttpClient};
///
/// let client = ReqwestHttpClient::new();
/// let response = client.post_json(
///     "https://api.example.com/endpoint",
///     &[("Content-Type", "application/json")],
///     &serde_json::json!({"key": "value"}),
/// ).await?;
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with JSON body.
    ///
    /// Non-success statuses are returned, not raised; only transport
    /// failures are errors.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse> {
        let mut request = self.client.post(url);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.json(body).send().await?;
        let status = response.status().as_u16();
        Ok(HttpResponse {
            status,
            body: response.text().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        let ok = HttpResponse {
            status: 200,
            body: String::new(),
        };
        let limited = HttpResponse {
            status: 429,
            body: "rate limited".to_string(),
        };
        assert!(ok.is_success());
        assert!(!limited.is_success());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = ReqwestHttpClient::new();
        let result = client
            .post_json("http://127.0.0.1:1/", &[], &serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }
}
