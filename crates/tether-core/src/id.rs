//! Request id allocation and batch correlation.
//!
//! Every request a sender issues gets an id from an [`IdAllocator`]. Persistent connections
//! correlate a response with its request by id; for batches, where the node may answer in any
//! order, both sides of the exchange reduce the batch to a single [`canonical_id`].

use crate::types::{JsonRpcRequest, JsonRpcResponse, RequestId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates strictly increasing request ids for the lifetime of the allocator.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id. Never returns the same value twice.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the next id as a numeric [`RequestId`].
    pub fn next_request_id(&self) -> RequestId {
        RequestId::from(self.next_id())
    }

    /// Builds a request with a freshly allocated id.
    pub fn request(
        &self,
        method: impl Into<String>,
        params: Vec<serde_json::Value>,
    ) -> JsonRpcRequest {
        JsonRpcRequest::new(method, params, self.next_request_id())
    }
}

/// Selects the representative id of a set of ids.
///
/// Preference order: the lexicographically smallest string id, else the numerically smallest
/// integer id, else [`RequestId::Null`] if any member carried an explicit `null` id. Returns
/// `None` when no member carries an id at all, meaning the exchange cannot be correlated.
///
/// The result does not depend on the order of `ids`.
#[must_use]
pub fn canonical_id<'a, I>(ids: I) -> Option<RequestId>
where
    I: IntoIterator<Item = Option<&'a RequestId>>,
{
    let mut smallest_string: Option<&str> = None;
    let mut smallest_number: Option<i64> = None;
    let mut saw_null = false;

    for id in ids.into_iter().flatten() {
        match id {
            RequestId::String(s) => {
                if smallest_string.is_none_or(|current| s.as_str() < current) {
                    smallest_string = Some(s);
                }
            }
            RequestId::Number(n) => {
                if smallest_number.is_none_or(|current| *n < current) {
                    smallest_number = Some(*n);
                }
            }
            RequestId::Null => saw_null = true,
        }
    }

    smallest_string
        .map(|s| RequestId::String(s.to_string()))
        .or(smallest_number.map(RequestId::Number))
        .or(saw_null.then_some(RequestId::Null))
}

/// Canonical id of an outgoing batch.
#[must_use]
pub fn canonical_request_id(requests: &[JsonRpcRequest]) -> Option<RequestId> {
    canonical_id(requests.iter().map(|request| request.id.as_ref()))
}

/// Canonical id of an incoming batch response.
#[must_use]
pub fn canonical_response_id(responses: &[JsonRpcResponse]) -> Option<RequestId> {
    canonical_id(responses.iter().map(|response| Some(&response.id)))
}
