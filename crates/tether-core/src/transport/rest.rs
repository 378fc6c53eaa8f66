use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::http::HttpTransport;
use crate::{
    config::{HttpConfig, RetryConfig},
    errors::TetherError,
    sender::retry_delay,
};

/// Sender for provider REST endpoints that live next to the JSON-RPC endpoint.
///
/// For an endpoint `https://host/v2/<key>`, `send("/getNFTs", query)` issues
/// `GET https://host/<key>/getNFTs?<query>`. Rate-limited responses are retried with the same
/// interval and jitter as JSON-RPC sends.
pub struct RestSender {
    client: Client,
    origin: Url,
    api_key: String,
    retry: RetryConfig,
}

impl RestSender {
    /// Creates a REST sender for the JSON-RPC endpoint `url`.
    ///
    /// # Errors
    ///
    /// - [`TetherError::UnsupportedUrl`] for WebSocket or otherwise non-HTTP URLs, or URLs
    ///   without an API key path segment
    /// - [`TetherError::Config`] if the HTTP client fails to build
    pub fn new(url: &str, retry: RetryConfig, http: &HttpConfig) -> Result<Self, TetherError> {
        let parsed = Url::parse(url).map_err(|e| TetherError::UnsupportedUrl(e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => {}
            "ws" | "wss" => {
                return Err(TetherError::UnsupportedUrl(
                    "REST endpoints are not available over websockets".to_string(),
                ))
            }
            other => return Err(TetherError::UnsupportedUrl(format!("unsupported scheme {other}"))),
        }

        let api_key = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(String::from)
            .ok_or_else(|| TetherError::UnsupportedUrl("URL has no API key segment".to_string()))?;

        let mut origin = parsed;
        origin.set_path("");
        origin.set_query(None);

        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .use_rustls_tls()
            .build()
            .map_err(|e| TetherError::Config(format!("HTTP client build failed: {e}")))?;

        Ok(Self { client, origin, api_key, retry })
    }

    /// Builds the request URL for `path` (without the query).
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Url {
        let mut endpoint = self.origin.clone();
        let path = path.trim_start_matches('/');
        endpoint.set_path(&format!("{}/{path}", self.api_key));
        endpoint
    }

    /// Sends a GET request, retrying while rate limited.
    ///
    /// # Errors
    ///
    /// - [`TetherError::RateLimitExhausted`] if every attempt returned 429
    /// - [`TetherError::NetworkFailure`] for other non-200 statuses and network failures
    /// - [`TetherError::InvalidResponse`] if the body is not JSON
    pub async fn send<Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<Value, TetherError> {
        let endpoint = self.endpoint(path);
        let attempts = self.retry.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let response = self.client.get(endpoint.clone()).query(query).send().await.map_err(
                |e| TetherError::NetworkFailure {
                    status: 0,
                    message: HttpTransport::sanitize_network_error(&e),
                },
            )?;

            match response.status() {
                StatusCode::OK => {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| TetherError::InvalidResponse(e.to_string()));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    tracing::debug!(path = path, attempt = attempt, "rest request rate limited");
                }
                status => {
                    return Err(TetherError::NetworkFailure {
                        status: status.as_u16(),
                        message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
                    });
                }
            }

            if attempt < attempts {
                tokio::time::sleep(retry_delay(&self.retry)).await;
            }
        }

        Err(TetherError::RateLimitExhausted { attempts })
    }
}
