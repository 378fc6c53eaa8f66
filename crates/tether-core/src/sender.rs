//! Retry and failover layer over a primary [`Transport`].
//!
//! # Routing
//!
//! ```text
//! payload ─► uses a denied method? ── yes ─► secondary provider (or NoProviderAvailable)
//!                  │ no
//!                  ▼
//!            primary transport ◄──── RateLimited: sleep interval + jitter, retry
//!                  │                 (at most max_retries + 1 attempts)
//!        ┌─────────┴──────────┐
//!     Success            NetworkError ─► secondary provider, primary error if it fails
//! ```
//!
//! Methods that sign, submit transactions or list accounts are never sent to the primary.
//! They are served by a secondary provider supplied by the application, which can be swapped
//! at runtime with [`PayloadSender::set_secondary_provider`].

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use rand::Rng;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;

use crate::{
    config::RetryConfig,
    errors::TetherError,
    transport::{SendOutcome, Transport},
    types::{JsonRpcResponse, Payload, PayloadResponse},
};

/// Methods that are never sent to the primary endpoint.
pub const DENIED_METHODS: &[&str] = &[
    "eth_accounts",
    "eth_sendRawTransaction",
    "eth_sendTransaction",
    "eth_sign",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "personal_sign",
];

/// Returns the first denied method used by `payload`, if any.
#[must_use]
pub fn denied_method(payload: &Payload) -> Option<&str> {
    payload
        .requests()
        .map(|request| request.method.as_str())
        .find(|method| DENIED_METHODS.contains(method))
}

/// Delay before the next rate-limited attempt: `retry_interval_ms + rand(0..retry_jitter_ms)`.
pub(crate) fn retry_delay(config: &RetryConfig) -> Duration {
    let jitter = if config.retry_jitter_ms > 0 {
        rand::rng().random_range(0..config.retry_jitter_ms)
    } else {
        0
    };
    Duration::from_millis(config.retry_interval_ms.saturating_add(jitter))
}

/// Secondary provider exposing a promise-style `request(method, params)`.
///
/// Batches are sent member by member.
#[async_trait]
pub trait RequestProvider: Send + Sync {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TetherError>;
}

/// Completion callback handed to a [`CallbackProvider`].
pub type ProviderCallback = Box<dyn FnOnce(Result<PayloadResponse, TetherError>) + Send>;

/// Secondary provider exposing a callback-style `send_async(payload, callback)`.
///
/// Receives the whole payload, batches included.
pub trait CallbackProvider: Send + Sync {
    fn send_async(&self, payload: Payload, callback: ProviderCallback);
}

/// A locally supplied provider used for denied methods and as a failover target.
#[derive(Clone)]
pub enum SecondaryProvider {
    Request(Arc<dyn RequestProvider>),
    Callback(Arc<dyn CallbackProvider>),
}

impl std::fmt::Debug for SecondaryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(_) => f.write_str("SecondaryProvider::Request"),
            Self::Callback(_) => f.write_str("SecondaryProvider::Callback"),
        }
    }
}

impl SecondaryProvider {
    pub fn request(provider: impl RequestProvider + 'static) -> Self {
        Self::Request(Arc::new(provider))
    }

    pub fn callback(provider: impl CallbackProvider + 'static) -> Self {
        Self::Callback(Arc::new(provider))
    }

    /// Sends `payload` through whichever shape this provider has.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or [`TetherError::Secondary`] if a callback provider
    /// drops its callback without calling it.
    pub async fn send(&self, payload: &Payload) -> Result<PayloadResponse, TetherError> {
        match self {
            Self::Request(provider) => match payload {
                Payload::Single(request) => {
                    let result = provider.request(&request.method, request.params.clone()).await?;
                    Ok(PayloadResponse::Single(JsonRpcResponse::success(
                        result,
                        request.id.clone().unwrap_or_default(),
                    )))
                }
                Payload::Batch(requests) => {
                    let responses = try_join_all(requests.iter().map(|request| async move {
                        let result =
                            provider.request(&request.method, request.params.clone()).await?;
                        Ok::<_, TetherError>(JsonRpcResponse::success(
                            result,
                            request.id.clone().unwrap_or_default(),
                        ))
                    }))
                    .await?;
                    Ok(PayloadResponse::Batch(responses))
                }
            },
            Self::Callback(provider) => {
                let (tx, rx) = oneshot::channel();
                provider.send_async(
                    payload.clone(),
                    Box::new(move |result| {
                        let _ = tx.send(result);
                    }),
                );
                rx.await.map_err(|_| {
                    TetherError::Secondary("provider dropped the callback".to_string())
                })?
            }
        }
    }
}

/// Sends payloads through the primary transport with retry and failover.
pub struct PayloadSender {
    primary: Arc<dyn Transport>,
    retry: RetryConfig,
    secondary: ArcSwapOption<SecondaryProvider>,
}

impl PayloadSender {
    #[must_use]
    pub fn new(primary: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Self { primary, retry, secondary: ArcSwapOption::empty() }
    }

    #[must_use]
    pub fn with_secondary_provider(self, secondary: SecondaryProvider) -> Self {
        self.secondary.store(Some(Arc::new(secondary)));
        self
    }

    /// Replaces (or removes) the secondary provider. Sends already in flight keep using the
    /// provider they started with.
    pub fn set_secondary_provider(&self, secondary: Option<SecondaryProvider>) {
        self.secondary.store(secondary.map(Arc::new));
    }

    #[must_use]
    pub fn has_secondary_provider(&self) -> bool {
        self.secondary.load().is_some()
    }

    /// Sends a payload.
    ///
    /// # Errors
    ///
    /// - [`TetherError::NoProviderAvailable`] for denied methods without a secondary provider
    /// - [`TetherError::RateLimitExhausted`] if every primary attempt was rate limited
    /// - [`TetherError::NetworkFailure`] with the primary's error if the primary failed and
    ///   failover was unavailable or failed too
    pub async fn send(&self, payload: &Payload) -> Result<PayloadResponse, TetherError> {
        let secondary = self.secondary.load_full();

        if let Some(method) = denied_method(payload) {
            let Some(secondary) = secondary else {
                return Err(TetherError::NoProviderAvailable { method: method.to_string() });
            };
            tracing::debug!(method = method, "routing denied method to secondary provider");
            return secondary.send(payload).await;
        }

        let primary_error = match self.send_with_retries(payload).await {
            Ok(response) => return Ok(response),
            Err(error @ TetherError::NetworkFailure { .. }) => error,
            Err(error) => return Err(error),
        };

        let Some(secondary) = secondary else {
            return Err(primary_error);
        };

        tracing::warn!(
            payload = %payload.describe(),
            error = %primary_error,
            "primary failed, falling back to secondary provider"
        );
        match secondary.send(payload).await {
            Ok(response) => Ok(response),
            Err(secondary_error) => {
                tracing::warn!(error = %secondary_error, "secondary provider failed");
                Err(primary_error)
            }
        }
    }

    async fn send_with_retries(&self, payload: &Payload) -> Result<PayloadResponse, TetherError> {
        let attempts = self.retry.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self.primary.send(payload).await {
                SendOutcome::Success(response) => return Ok(response),
                SendOutcome::RateLimited => {
                    tracing::debug!(
                        payload = %payload.describe(),
                        attempt = attempt,
                        max_attempts = attempts,
                        "primary rate limited"
                    );
                }
                SendOutcome::NetworkError { status, message } => {
                    return Err(TetherError::NetworkFailure { status, message });
                }
            }

            if attempt < attempts {
                tokio::time::sleep(retry_delay(&self.retry)).await;
            }
        }

        Err(TetherError::RateLimitExhausted { attempts })
    }
}
