//! JSON-RPC envelope types and inbound message classification.
//!
//! # Type Categories
//!
//! ## Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: JSON-RPC 2.0 envelopes
//! - [`RequestId`]: string, numeric or `null` request identifiers
//! - [`Payload`], [`PayloadResponse`]: a single envelope or an ordered batch
//!
//! ## Subscription Types
//! - [`SubscriptionEvent`]: consumer-facing `{subscription, result}` pair
//! - [`InboundMessage`]: classification of a raw frame received over a persistent connection
//!
//! Request and response bodies are opaque: params and results are carried as
//! [`serde_json::Value`] and never interpreted by the transport layer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{borrow::Cow, fmt};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Method name used by nodes for subscription push notifications.
pub const SUBSCRIPTION_NOTIFICATION_METHOD: &str = "eth_subscription";

/// JSON-RPC request identifier.
///
/// Ordering between ids only matters for canonical id selection, see
/// [`crate::id::canonical_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    #[default]
    Null,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Deserializes a present `id` field (including an explicit `null`) as `Some`.
///
/// Plain `Option` would collapse `"id": null` and a missing `id` into the same value, which
/// loses the distinction canonical id selection depends on.
fn deserialize_present_id<'de, D>(deserializer: D) -> Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    RequestId::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 request structure.
///
/// `id` is `None` for notifications, which are sent but never correlated with a response.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tether_core::types::{JsonRpcRequest, RequestId};
///
/// let request = JsonRpcRequest::new("eth_blockNumber", vec![], RequestId::Number(1));
/// assert_eq!(
///     serde_json::to_value(&request).unwrap(),
///     json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "params": [], "id": 1})
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(
        default,
        deserialize_with = "deserialize_present_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: RequestId) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Some(id) }
    }

    /// Creates a request without an id.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: None }
    }
}

/// JSON-RPC 2.0 response structure.
///
/// A response carries either a `result` or an `error`. A `null` result deserializes to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: RequestId,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response.
    #[must_use]
    pub fn success(result: Value, id: RequestId) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error JSON-RPC response.
    #[must_use]
    pub fn error(code: i64, message: impl Into<String>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard error codes follow the JSON-RPC 2.0 convention (`-32700` parse error, `-32600`
/// invalid request, `-32601` method not found, ...). Code `429` is used by hosted node
/// providers to signal rate limiting inside an otherwise successful frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error code hosted providers use for rate limiting at the JSON-RPC level.
pub const RATE_LIMIT_ERROR_CODE: i64 = 429;

/// A single request or an ordered batch of requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Batch(Vec<JsonRpcRequest>),
    Single(JsonRpcRequest),
}

impl Payload {
    /// Iterates over every request in the payload.
    pub fn requests(&self) -> impl Iterator<Item = &JsonRpcRequest> {
        match self {
            Self::Single(request) => std::slice::from_ref(request).iter(),
            Self::Batch(requests) => requests.iter(),
        }
    }

    /// Returns a short description of the payload for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Single(request) => request.method.clone(),
            Self::Batch(requests) => format!("batch[{}]", requests.len()),
        }
    }
}

impl From<JsonRpcRequest> for Payload {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Single(request)
    }
}

impl From<Vec<JsonRpcRequest>> for Payload {
    fn from(requests: Vec<JsonRpcRequest>) -> Self {
        Self::Batch(requests)
    }
}

/// Response to a [`Payload`]. Batch members may be in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadResponse {
    Batch(Vec<JsonRpcResponse>),
    Single(JsonRpcResponse),
}

impl PayloadResponse {
    /// Returns the error of a single response whose error code signals rate limiting.
    ///
    /// Batch responses are never classified as rate limited as a whole.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Single(JsonRpcResponse { error: Some(JsonRpcError { code, .. }), .. })
                if *code == RATE_LIMIT_ERROR_CODE
        )
    }

    /// Returns the single response, if this is not a batch.
    #[must_use]
    pub fn into_single(self) -> Option<JsonRpcResponse> {
        match self {
            Self::Single(response) => Some(response),
            Self::Batch(_) => None,
        }
    }
}

/// Event delivered to subscription consumers.
///
/// `subscription` is always the virtual id handed out by `subscribe`, never the id of the
/// current connection-level subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub subscription: String,
    pub result: Value,
}

/// Raw `eth_subscription` notification as pushed by a node.
#[derive(Debug, Clone, Deserialize)]
struct SubscriptionNotification {
    method: String,
    params: SubscriptionEvent,
}

/// Classification of a frame received over a persistent connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A response (or batch of responses) to a request we sent.
    Response(PayloadResponse),
    /// A subscription push, keyed by the connection-level subscription id.
    Notification(SubscriptionEvent),
    /// Anything else, including frames that are not valid JSON.
    Unrecognized,
}

impl InboundMessage {
    /// Classifies a raw text frame.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::Unrecognized;
        };

        let is_notification = value.get("method").is_some() &&
            value.get("params").and_then(|params| params.get("subscription")).is_some();
        if is_notification {
            return match serde_json::from_value::<SubscriptionNotification>(value) {
                Ok(notification) if notification.method.ends_with("_subscription") => {
                    Self::Notification(notification.params)
                }
                _ => Self::Unrecognized,
            };
        }

        match serde_json::from_value::<PayloadResponse>(value) {
            Ok(response) => Self::Response(response),
            Err(_) => Self::Unrecognized,
        }
    }
}

/// Subscription flavours with dedicated backfill support.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionKind {
    NewHeads,
    Logs(LogFilter),
    /// Any other subscription type; resubscribed on reconnect but never backfilled.
    Other(String),
}

impl SubscriptionKind {
    /// Derives the kind from `eth_subscribe` style params (`["logs", {filter}]`).
    #[must_use]
    pub fn from_params(params: &[Value]) -> Self {
        match params.first().and_then(Value::as_str) {
            Some("newHeads") => Self::NewHeads,
            Some("logs") => Self::Logs(
                params
                    .get(1)
                    .and_then(|filter| serde_json::from_value(filter.clone()).ok())
                    .unwrap_or_default(),
            ),
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    /// Returns `true` if missed events of this kind can be reconstructed.
    #[must_use]
    pub fn supports_backfill(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Address/topic filter of a `logs` subscription.
///
/// Both fields keep the node's wire shape (a string or an array) untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Value>,
}
