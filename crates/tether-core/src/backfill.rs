//! Reconstruction of subscription events missed while a connection was down.
//!
//! # Algorithm
//!
//! Given the events already delivered (oldest first), a lower bound `from` and a target block
//! `to`:
//!
//! 1. With no delivered events, every matching event in blocks `(from, to]` is returned.
//! 2. Otherwise the delivered events are walked newest to oldest. For each event the block at
//!    its recorded height is re-fetched (once per distinct height); the first event whose
//!    recorded block hash equals the canonical hash is the common ancestor.
//! 3. Every delivered event newer than the ancestor was reorged out. Each is returned again,
//!    tagged `removed: true`, in its original order, followed by the matching events in blocks
//!    `(ancestor, to]`.
//! 4. If no delivered event is still canonical, all of them are removed and the fresh range
//!    falls back to `(from, to]`.
//!
//! Every fetch races the caller's [`CancellationToken`]; once it fires the backfill returns
//! [`TetherError::Cancelled`] without a partial result.

use serde_json::{json, Map, Value};
use std::{collections::HashMap, collections::HashSet, future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::{
    errors::TetherError,
    rpc::{BatchPart, RpcClient},
    types::{LogFilter, SubscriptionKind},
    utils::{format_hex_u64, hex_field},
};

/// Block fields that `eth_getBlockByNumber` returns but `newHeads` notifications do not carry.
const NON_HEAD_FIELDS: &[&str] = &["totalDifficulty", "size", "transactions", "uncles"];

/// Event shapes with a known block position and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Heads,
    Logs,
}

impl EventFamily {
    /// Returns the family of a subscription kind, or `None` for opaque kinds.
    #[must_use]
    pub fn of(kind: &SubscriptionKind) -> Option<Self> {
        match kind {
            SubscriptionKind::NewHeads => Some(Self::Heads),
            SubscriptionKind::Logs(_) => Some(Self::Logs),
            SubscriptionKind::Other(_) => None,
        }
    }

    /// Height of the block the event belongs to.
    #[must_use]
    pub fn block_number(self, event: &Value) -> Option<u64> {
        match self {
            Self::Heads => hex_field(event, "number"),
            Self::Logs => hex_field(event, "blockNumber"),
        }
    }

    /// Hash of the block the event belongs to.
    #[must_use]
    pub fn block_hash(self, event: &Value) -> Option<&str> {
        match self {
            Self::Heads => event.get("hash").and_then(Value::as_str),
            Self::Logs => event.get("blockHash").and_then(Value::as_str),
        }
    }

    /// Dedup identity: `hash` for heads, `(blockHash, logIndex)` for logs.
    #[must_use]
    pub fn identity_key(self, event: &Value) -> Option<String> {
        match self {
            Self::Heads => event.get("hash").and_then(Value::as_str).map(String::from),
            Self::Logs => {
                let block_hash = event.get("blockHash").and_then(Value::as_str)?;
                let log_index = event.get("logIndex").and_then(Value::as_str)?;
                Some(format!("{block_hash}-{log_index}"))
            }
        }
    }
}

/// Returns `true` if the event is a reorg invalidation.
#[must_use]
pub fn is_removal(event: &Value) -> bool {
    event.get("removed").and_then(Value::as_bool).unwrap_or(false)
}

/// Drops every event whose identity key was already seen, keeping first occurrences in order.
/// Events without an identity key are always kept.
#[must_use]
pub fn dedupe_by_key(events: Vec<Value>, family: EventFamily) -> Vec<Value> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| family.identity_key(event).is_none_or(|key| seen.insert(key)))
        .collect()
}

fn mark_removed(event: &Value) -> Value {
    let mut removed = event.clone();
    if let Value::Object(fields) = &mut removed {
        fields.insert("removed".to_string(), Value::Bool(true));
    }
    removed
}

fn to_head_event(mut block: Value) -> Value {
    if let Value::Object(fields) = &mut block {
        for field in NON_HEAD_FIELDS {
            fields.remove(*field);
        }
    }
    block
}

pub(crate) async fn cancellable<T, F>(
    token: &CancellationToken,
    future: F,
) -> Result<T, TetherError>
where
    F: Future<Output = Result<T, TetherError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(TetherError::Cancelled),
        result = future => {
            if token.is_cancelled() {
                Err(TetherError::Cancelled)
            } else {
                result
            }
        }
    }
}

/// Computes missed `newHeads` and `logs` events.
#[derive(Clone)]
pub struct Backfiller {
    rpc: Arc<RpcClient>,
}

impl Backfiller {
    #[must_use]
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    /// Missed `newHeads` events for blocks `(from, to]`, reorg corrections first.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Cancelled`] if `token` fires, or any RPC error.
    pub async fn new_heads_backfill(
        &self,
        token: &CancellationToken,
        previous: &[Value],
        from: u64,
        to: u64,
    ) -> Result<Vec<Value>, TetherError> {
        let (mut events, lower) = self.reorg_split(token, EventFamily::Heads, previous, from).await?;
        events.extend(self.heads_in_range(token, lower, to).await?);
        Ok(events)
    }

    /// Missed `logs` events matching `filter` for blocks `(from, to]`, reorg corrections first.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Cancelled`] if `token` fires, or any RPC error.
    pub async fn logs_backfill(
        &self,
        token: &CancellationToken,
        filter: &LogFilter,
        previous: &[Value],
        from: u64,
        to: u64,
    ) -> Result<Vec<Value>, TetherError> {
        let (mut events, lower) = self.reorg_split(token, EventFamily::Logs, previous, from).await?;
        events.extend(self.logs_in_range(token, filter, lower, to).await?);
        Ok(events)
    }

    /// Finds the common ancestor of `previous` and the canonical chain.
    ///
    /// Returns the removals for every event past the ancestor and the exclusive lower bound of
    /// the fresh range.
    async fn reorg_split(
        &self,
        token: &CancellationToken,
        family: EventFamily,
        previous: &[Value],
        from: u64,
    ) -> Result<(Vec<Value>, u64), TetherError> {
        let mut canonical_hashes: HashMap<u64, Option<String>> = HashMap::new();
        let mut ancestor = None;

        for (index, event) in previous.iter().enumerate().rev() {
            let Some(number) = family.block_number(event) else { continue };

            let canonical = match canonical_hashes.get(&number) {
                Some(hash) => hash.clone(),
                None => {
                    let hash = self.canonical_hash(token, number).await?;
                    canonical_hashes.insert(number, hash.clone());
                    hash
                }
            };

            if canonical.is_some() && canonical.as_deref() == family.block_hash(event) {
                ancestor = Some((index, number));
                break;
            }
        }

        let (split, lower) = match ancestor {
            Some((index, number)) => (index + 1, number),
            None => (0, from),
        };

        if split < previous.len() {
            tracing::info!(
                removed = previous.len() - split,
                common_ancestor = ?ancestor.map(|(_, number)| number),
                "reorg detected during backfill"
            );
        }

        Ok((previous[split..].iter().map(mark_removed).collect(), lower))
    }

    async fn canonical_hash(
        &self,
        token: &CancellationToken,
        number: u64,
    ) -> Result<Option<String>, TetherError> {
        let block = cancellable(
            token,
            self.rpc.request("eth_getBlockByNumber", vec![json!(format_hex_u64(number)), json!(false)]),
        )
        .await?;
        Ok(block.get("hash").and_then(Value::as_str).map(String::from))
    }

    /// Heads for blocks `(from, to]`, fetched with a single batch.
    async fn heads_in_range(
        &self,
        token: &CancellationToken,
        from: u64,
        to: u64,
    ) -> Result<Vec<Value>, TetherError> {
        if from >= to {
            return Ok(Vec::new());
        }

        let parts = (from + 1..=to)
            .map(|number| {
                BatchPart::new(
                    "eth_getBlockByNumber",
                    vec![json!(format_hex_u64(number)), json!(false)],
                )
            })
            .collect();

        let blocks = cancellable(token, self.rpc.batch(parts)).await?;
        Ok(blocks.into_iter().filter(|block| !block.is_null()).map(to_head_event).collect())
    }

    /// Logs matching `filter` in blocks `(from, to]`.
    async fn logs_in_range(
        &self,
        token: &CancellationToken,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<Value>, TetherError> {
        if from >= to {
            return Ok(Vec::new());
        }

        let mut query = Map::new();
        if let Some(address) = &filter.address {
            query.insert("address".to_string(), address.clone());
        }
        if let Some(topics) = &filter.topics {
            query.insert("topics".to_string(), topics.clone());
        }
        query.insert("fromBlock".to_string(), json!(format_hex_u64(from + 1)));
        query.insert("toBlock".to_string(), json!(format_hex_u64(to)));

        let logs =
            cancellable(token, self.rpc.request("eth_getLogs", vec![Value::Object(query)])).await?;
        match logs {
            Value::Array(logs) => Ok(logs),
            Value::Null => Ok(Vec::new()),
            other => Err(TetherError::InvalidResponse(format!("eth_getLogs returned {other}"))),
        }
    }
}
