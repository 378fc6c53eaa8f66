//! Single-attempt transport senders.
//!
//! A [`Transport`] executes one request or batch over one channel and reports what happened as
//! a [`SendOutcome`]. Retrying and failover live one layer up, in [`crate::sender`].
//!
//! - [`http::HttpTransport`]: one POST per call
//! - [`ws::WsTransport`]: request/response correlation over a persistent connection
//! - [`rest::RestSender`]: provider REST endpoints (GET), outside of JSON-RPC

pub mod http;
pub mod rest;
pub mod ws;

use crate::{errors::TetherError, types::{Payload, PayloadResponse}};
use async_trait::async_trait;

/// Result of a single send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// A JSON-RPC response was received. It may still carry error objects.
    Success(PayloadResponse),
    /// The endpoint signalled rate limiting (HTTP 429 or a 429 error code).
    RateLimited,
    /// No usable response. `status` is `0` when no HTTP status is available.
    NetworkError { status: u16, message: String },
}

impl SendOutcome {
    /// Builds a network error outcome.
    #[must_use]
    pub fn network_error(status: u16, message: impl Into<String>) -> Self {
        Self::NetworkError { status, message: message.into() }
    }

    /// Reclassifies a single response with a 429 error code as [`SendOutcome::RateLimited`].
    #[must_use]
    pub fn from_response(response: PayloadResponse) -> Self {
        if response.is_rate_limited() {
            Self::RateLimited
        } else {
            Self::Success(response)
        }
    }

    /// Converts a network error outcome into the caller-facing error.
    #[must_use]
    pub fn into_error(self) -> Option<TetherError> {
        match self {
            Self::NetworkError { status, message } => {
                Some(TetherError::NetworkFailure { status, message })
            }
            Self::Success(_) | Self::RateLimited => None,
        }
    }
}

/// A channel capable of executing a JSON-RPC payload once.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> SendOutcome;
}
