use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

use crate::{
    errors::TetherError,
    id::IdAllocator,
    sender::PayloadSender,
    types::{Payload, PayloadResponse, RequestId},
    utils::parse_hex_u64,
};

/// One member of a batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPart {
    pub method: String,
    pub params: Vec<Value>,
}

impl BatchPart {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { method: method.into(), params }
    }
}

/// Method-level calls on top of a [`PayloadSender`].
///
/// Builds envelopes with ids from its own [`IdAllocator`] and unwraps results, turning JSON-RPC
/// error objects into [`TetherError`]s.
pub struct RpcClient {
    sender: Arc<PayloadSender>,
    ids: IdAllocator,
}

impl RpcClient {
    #[must_use]
    pub fn new(sender: Arc<PayloadSender>) -> Self {
        Self { sender, ids: IdAllocator::new() }
    }

    #[must_use]
    pub fn sender(&self) -> &Arc<PayloadSender> {
        &self.sender
    }

    /// Sends a single request and returns its result. A `null` result is returned as
    /// [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Rpc`] for an error response, or any error of the sender.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TetherError> {
        let payload = Payload::Single(self.ids.request(method, params));

        match self.sender.send(&payload).await? {
            PayloadResponse::Single(response) => match response.error {
                Some(error) => Err(error.into()),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            PayloadResponse::Batch(_) => Err(TetherError::InvalidResponse(format!(
                "batch response to single request {method}"
            ))),
        }
    }

    /// Sends `parts` as one batch and returns the results in request order.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::BatchPartialError`] if the node answered with a single error
    /// instead of an array, or if any member failed (the first failure found is reported).
    pub async fn batch(&self, parts: Vec<BatchPart>) -> Result<Vec<Value>, TetherError> {
        if parts.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<_> =
            parts.into_iter().map(|part| self.ids.request(part.method, part.params)).collect();
        let order: Vec<RequestId> =
            requests.iter().map(|request| request.id.clone().unwrap_or_default()).collect();

        let responses = match self.sender.send(&Payload::Batch(requests)).await? {
            PayloadResponse::Batch(responses) => responses,
            PayloadResponse::Single(response) => {
                let (code, message) = response.error.map_or_else(
                    || (0, "Batch request failed".to_string()),
                    |error| (error.code, error.message),
                );
                return Err(TetherError::BatchPartialError { code, message });
            }
        };

        if let Some(error) = responses.iter().find_map(|response| response.error.as_ref()) {
            return Err(TetherError::BatchPartialError {
                code: error.code,
                message: error.message.clone(),
            });
        }

        let mut results: HashMap<RequestId, Value> = responses
            .into_iter()
            .map(|response| (response.id, response.result.unwrap_or(Value::Null)))
            .collect();

        order
            .iter()
            .map(|id| {
                results.remove(id).ok_or_else(|| {
                    TetherError::InvalidResponse(format!("batch response is missing id {id}"))
                })
            })
            .collect()
    }

    /// Returns the current block height.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::InvalidResponse`] if the result is not a hex quantity.
    pub async fn block_number(&self) -> Result<u64, TetherError> {
        let result = self.request("eth_blockNumber", Vec::new()).await?;
        result.as_str().and_then(parse_hex_u64).ok_or_else(|| {
            TetherError::InvalidResponse(format!("invalid eth_blockNumber result: {result}"))
        })
    }
}
