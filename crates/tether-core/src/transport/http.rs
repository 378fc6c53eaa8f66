use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;

use super::{SendOutcome, Transport};
use crate::{
    config::HttpConfig,
    errors::TetherError,
    types::{Payload, PayloadResponse},
};

/// HTTP transport with semaphore-based concurrency control.
///
/// Issues exactly one POST per [`Transport::send`] call. Retrying is left to the payload
/// sender so that every attempt is visible to its retry accounting.
pub struct HttpTransport {
    client: Client,
    url: String,
    concurrent_limit: Arc<Semaphore>,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Config`] if the underlying reqwest client fails to build.
    pub fn new(url: impl Into<String>, config: &HttpConfig) -> Result<Self, TetherError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.concurrent_limit)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                TetherError::Config(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            url: url.into(),
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Sanitizes network errors so endpoint URLs (which often embed API keys) never leak
    /// into error messages.
    pub(crate) fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}

/// Classifies an HTTP response into a [`SendOutcome`].
pub(crate) fn classify_response(status: StatusCode, body: &[u8]) -> SendOutcome {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SendOutcome::RateLimited;
    }

    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("HTTP error");
        return SendOutcome::network_error(status.as_u16(), reason);
    }

    match serde_json::from_slice::<PayloadResponse>(body) {
        Ok(response) => SendOutcome::from_response(response),
        Err(e) => SendOutcome::network_error(
            status.as_u16(),
            format!("invalid JSON-RPC response body: {e}"),
        ),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> SendOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => bytes::Bytes::from(body),
            Err(e) => return SendOutcome::network_error(0, format!("failed to serialize: {e}")),
        };

        let permit = match tokio::time::timeout(
            self.request_timeout,
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    available_permits = self.concurrent_limit.available_permits(),
                    "http transport concurrency limit reached"
                );
                return SendOutcome::network_error(0, "concurrency limit reached");
            }
        };

        tracing::debug!(payload = %payload.describe(), "sending http request");

        let result = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await;

        let outcome = match result {
            Ok(response) => {
                let status = response.status();
                match response.bytes().await {
                    Ok(bytes) => classify_response(status, &bytes),
                    Err(e) => SendOutcome::network_error(
                        status.as_u16(),
                        Self::sanitize_network_error(&e),
                    ),
                }
            }
            Err(e) => SendOutcome::network_error(0, Self::sanitize_network_error(&e)),
        };
        drop(permit);

        match &outcome {
            SendOutcome::Success(_) => tracing::trace!("http request completed"),
            SendOutcome::RateLimited => tracing::debug!("http request rate limited"),
            SendOutcome::NetworkError { status, message } => {
                tracing::debug!(status = status, error = %message, "http request failed");
            }
        }

        outcome
    }
}
