use crate::types::{JsonRpcError, RequestId};
use thiserror::Error;

/// Errors surfaced by senders, the RPC layer and the subscription provider.
///
/// Transport and retry errors propagate to the caller of the failing call. Backfill errors
/// have no caller waiting on them; the subscription provider logs them per subscription.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TetherError {
    /// Every attempt of a send was answered with a rate-limit signal.
    #[error("Rate limited for {attempts} consecutive attempts.")]
    RateLimitExhausted { attempts: u32 },

    /// Transport-level failure. `status` is the HTTP status, or `0` when no response was
    /// received at all.
    #[error("{}", format_network_failure(*status, message))]
    NetworkFailure { status: u16, message: String },

    /// A denied method was requested but no secondary provider is configured.
    #[error("No provider available to handle {method}; configure a secondary provider")]
    NoProviderAvailable { method: String },

    /// A member of a batch response carried an error. Holds the first error found.
    #[error("Batch request failed: {message}")]
    BatchPartialError { code: i64, message: String },

    /// A request reused an id that was still awaiting a response.
    #[error("Another request was made with the same id ({id}) before a response was received")]
    SubscriptionIdCollision { id: RequestId },

    /// Backfilling a subscription after a reconnect failed.
    #[error("Backfill failed for subscription {subscription}: {reason}")]
    BackfillFailure { subscription: String, reason: String },

    /// JSON-RPC error object returned for a single request.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Operation exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    /// Response could not be parsed or had an unexpected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Secondary provider returned an error.
    #[error("Secondary provider error: {0}")]
    Secondary(String),

    /// Persistent connection failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Endpoint URL scheme is neither HTTP(S) nor WebSocket.
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn format_network_failure(status: u16, message: &str) -> String {
    if status == 0 {
        message.to_string()
    } else {
        format!("({status}) {message}")
    }
}

impl TetherError {
    /// Returns `true` if retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimitExhausted { .. } | Self::Timeout(_) | Self::Connection(_) => true,
            Self::NetworkFailure { status, .. } => {
                *status == 0 || *status == 429 || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// Returns `true` if this error came from cooperative cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<JsonRpcError> for TetherError {
    fn from(error: JsonRpcError) -> Self {
        Self::Rpc { code: error.code, message: error.message }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}

/// Errors of the persistent connection primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionError {
    /// A frame was sent while no socket is open.
    #[error("Connection is not open")]
    NotConnected,

    /// The connection was closed by the owner and will not reconnect.
    #[error("Connection closed")]
    Closed,

    /// The initial connect or handshake failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Writing a frame to the socket failed.
    #[error("Send failed: {0}")]
    SendFailed(String),
}
