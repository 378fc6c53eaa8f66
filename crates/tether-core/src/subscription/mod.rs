//! Subscriptions that survive reconnects without gaps.
//!
//! Callers hold a *virtual* subscription id: the id the node returned for the first
//! `eth_subscribe`. Each reconnect yields a new connection-level (*physical*) id; pushes are
//! routed by physical id and always delivered under the virtual id.
//!
//! # Reconnect flow
//!
//! ```text
//! Down ──▶ heartbeat stopped, running backfills cancelled
//!
//! Reopen ──▶ physical index cleared
//!        └─▶ per subscription, concurrently:
//!              mark backfilling (live pushes are buffered)
//!              resubscribe, bind the new physical id
//!              backfill with retry (newHeads / logs only)
//!              emit dedupe([backfilled.., buffered..]), resume live delivery
//!        └─▶ heartbeat restarted
//! ```
//!
//! A failed backfill is logged for its subscription only; buffered live events are still
//! flushed. A backfill cancelled by the next `Down` leaves its subscription to the next
//! `Reopen`.

mod heartbeat;
mod state;

pub use state::{ConnectionState, ORPHAN_BUFFER_CAPACITY};

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    backfill::{cancellable, Backfiller},
    config::SubscriptionConfig,
    connection::{ConnectionEvent, PersistentConnection},
    errors::TetherError,
    rpc::{BatchPart, RpcClient},
    types::{InboundMessage, SubscriptionEvent, SubscriptionKind},
};
use state::{BackfillPlan, Registry, VirtualSubscription};

pub const DEFAULT_SUBSCRIBE_METHOD: &str = "eth_subscribe";
pub const DEFAULT_UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";

/// Caller handle of a virtual subscription.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    /// The virtual id. Stable across reconnects.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next event. Returns `None` once the provider is gone, the subscription
    /// was removed, or the connection gave up reconnecting.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}

struct Inner {
    connection: Arc<dyn PersistentConnection>,
    rpc: Arc<RpcClient>,
    backfiller: Backfiller,
    config: SubscriptionConfig,
    registry: Mutex<Registry>,
    backfill_token: Mutex<CancellationToken>,
    heartbeat_token: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

/// Persistent subscription provider over a [`PersistentConnection`].
pub struct SubscriptionProvider {
    inner: Arc<Inner>,
    listener: JoinHandle<()>,
}

impl SubscriptionProvider {
    /// Starts listening on `connection` and starts the heartbeat.
    ///
    /// `rpc` must send over the same connection.
    #[must_use]
    pub fn new(
        connection: Arc<dyn PersistentConnection>,
        rpc: Arc<RpcClient>,
        config: SubscriptionConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            backfiller: Backfiller::new(Arc::clone(&rpc)),
            backfill_token: Mutex::new(shutdown.child_token()),
            connection,
            rpc,
            config,
            registry: Mutex::new(Registry::new()),
            heartbeat_token: Mutex::new(None),
            shutdown,
        });

        let events = inner.connection.listen();
        let listener = tokio::spawn(run_events(Arc::clone(&inner), events));
        inner.start_heartbeat();

        Self { inner, listener }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.registry.lock().state
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Subscribes with `eth_subscribe`. `params` starts with the subscription type, e.g.
    /// `["logs", {"address": "0x..."}]`.
    ///
    /// # Errors
    ///
    /// Returns any error of the `eth_blockNumber` or subscribe request, or
    /// [`TetherError::SubscriptionIdCollision`] if the node reused a live subscription id.
    pub async fn subscribe(&self, params: Vec<Value>) -> Result<Subscription, TetherError> {
        self.subscribe_with_method(DEFAULT_SUBSCRIBE_METHOD, params).await
    }

    /// Subscribes with a custom subscribe method.
    pub async fn subscribe_with_method(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Subscription, TetherError> {
        let starting_block = self.inner.rpc.block_number().await?;
        let id = subscription_id(self.inner.rpc.request(method, params.clone()).await?)?;

        let (sink, events) = mpsc::unbounded_channel();
        let subscription =
            VirtualSubscription::new(id.clone(), method.to_string(), params, starting_block, sink);
        self.inner.registry.lock().insert(subscription)?;

        tracing::info!(
            subscription = %id,
            method = method,
            starting_block = starting_block,
            "subscribed"
        );
        Ok(Subscription { id, events })
    }

    /// Unsubscribes with `eth_unsubscribe`. Returns `Ok(false)` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns any error of the unsubscribe request. The subscription is removed locally
    /// either way.
    pub async fn unsubscribe(&self, virtual_id: &str) -> Result<bool, TetherError> {
        self.unsubscribe_with_method(virtual_id, DEFAULT_UNSUBSCRIBE_METHOD).await
    }

    /// Unsubscribes with a custom unsubscribe method.
    pub async fn unsubscribe_with_method(
        &self,
        virtual_id: &str,
        method: &str,
    ) -> Result<bool, TetherError> {
        let Some(physical_id) = self.inner.registry.lock().remove(virtual_id) else {
            return Ok(false);
        };

        tracing::info!(subscription = %virtual_id, physical_id = %physical_id, "unsubscribing");
        let result = self.inner.rpc.request(method, vec![json!(physical_id)]).await?;
        Ok(result.as_bool().unwrap_or(true))
    }

    /// Plain request over the subscription connection.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TetherError> {
        self.inner.rpc.request(method, params).await
    }

    /// Plain batch over the subscription connection.
    pub async fn batch(&self, parts: Vec<BatchPart>) -> Result<Vec<Value>, TetherError> {
        self.inner.rpc.batch(parts).await
    }

    /// Stops every background task and closes the connection. Open [`Subscription`] handles
    /// return `None` once drained.
    pub fn disconnect(&self) {
        self.inner.shutdown.cancel();
        self.inner.connection.close();
        self.listener.abort();
        self.inner.registry.lock().clear_all();
    }
}

impl Drop for SubscriptionProvider {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.listener.abort();
    }
}

/// `eth_subscribe` pairs with `eth_unsubscribe`, `parity_subscribe` with `parity_unsubscribe`.
fn unsubscribe_method_for(subscribe_method: &str) -> String {
    subscribe_method.strip_suffix("_subscribe").map_or_else(
        || DEFAULT_UNSUBSCRIBE_METHOD.to_string(),
        |namespace| format!("{namespace}_unsubscribe"),
    )
}

fn subscription_id(result: Value) -> Result<String, TetherError> {
    match result {
        Value::String(id) => Ok(id),
        other => Err(TetherError::InvalidResponse(format!("invalid subscription id: {other}"))),
    }
}

async fn run_events(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    loop {
        let event = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(ConnectionEvent::Message(text)) => {
                if let InboundMessage::Notification(event) = InboundMessage::parse(&text) {
                    inner.registry.lock().route(event);
                }
            }
            Some(ConnectionEvent::Down) => inner.handle_down(),
            Some(ConnectionEvent::Reopen) => inner.handle_reopen(),
            None => {
                inner.handle_closed();
                break;
            }
        }
    }
    tracing::debug!("subscription event loop stopped");
}

impl Inner {
    fn handle_down(&self) {
        tracing::warn!("connection down, pausing subscriptions");
        self.registry.lock().state = ConnectionState::Down;
        self.stop_heartbeat();
        self.backfill_token.lock().cancel();
    }

    /// The connection stopped for good: close every handle instead of leaving it pending.
    fn handle_closed(&self) {
        self.stop_heartbeat();
        self.backfill_token.lock().cancel();
        let mut registry = self.registry.lock();
        tracing::error!(
            subscriptions = registry.len(),
            "connection closed permanently, ending subscriptions"
        );
        registry.state = ConnectionState::Down;
        registry.clear_all();
    }

    fn handle_reopen(self: &Arc<Self>) {
        let token = self.shutdown.child_token();
        let previous = std::mem::replace(&mut *self.backfill_token.lock(), token.clone());
        previous.cancel();

        let ids = {
            let mut registry = self.registry.lock();
            registry.clear_physical();
            let ids = registry.virtual_ids();
            registry.state = if ids.is_empty() {
                ConnectionState::Connected
            } else {
                ConnectionState::Backfilling
            };
            ids
        };

        tracing::info!(subscriptions = ids.len(), "connection reopened, restoring subscriptions");

        if !ids.is_empty() {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                join_all(ids.into_iter().map(|id| inner.restore_subscription(id, &token))).await;
                if !token.is_cancelled() {
                    inner.registry.lock().state = ConnectionState::Connected;
                    tracing::info!("subscriptions restored");
                }
            });
        }

        self.start_heartbeat();
    }

    /// Resubscribes one virtual subscription and emits what it missed.
    async fn restore_subscription(&self, virtual_id: String, token: &CancellationToken) {
        let plan = self.registry.lock().get_mut(&virtual_id).map(VirtualSubscription::begin_backfill);
        let Some(plan) = plan else { return };

        let outcome = self.resubscribe_and_backfill(&virtual_id, &plan, token).await;
        let backfilled = match outcome {
            Ok(backfilled) => backfilled,
            Err(TetherError::Cancelled) => {
                tracing::debug!(subscription = %virtual_id, "backfill cancelled");
                return;
            }
            Err(error) => {
                let failure = TetherError::BackfillFailure {
                    subscription: virtual_id.clone(),
                    reason: error.to_string(),
                };
                tracing::error!(
                    subscription = %virtual_id,
                    error = %failure,
                    "subscription restore failed"
                );
                Vec::new()
            }
        };

        let mut registry = self.registry.lock();
        if token.is_cancelled() {
            return;
        }
        if let Some(subscription) = registry.get_mut(&virtual_id) {
            tracing::debug!(
                subscription = %virtual_id,
                backfilled = backfilled.len(),
                "resuming live delivery"
            );
            subscription.finish_backfill(backfilled);
        }
    }

    async fn resubscribe_and_backfill(
        &self,
        virtual_id: &str,
        plan: &BackfillPlan,
        token: &CancellationToken,
    ) -> Result<Vec<Value>, TetherError> {
        let physical_id = subscription_id(
            cancellable(token, self.rpc.request(&plan.method, plan.params.clone())).await?,
        )?;

        let bound = self.registry.lock().bind(virtual_id, physical_id.clone());
        if !bound {
            tracing::debug!(
                subscription = %virtual_id,
                "subscription removed while resubscribing, releasing new id"
            );
            let method = unsubscribe_method_for(&plan.method);
            if let Err(error) = self.rpc.request(&method, vec![json!(physical_id)]).await {
                tracing::debug!(
                    physical_id = %physical_id,
                    method = %method,
                    error = %error,
                    "failed to release orphaned subscription id"
                );
            }
            return Err(TetherError::Cancelled);
        }

        tracing::debug!(subscription = %virtual_id, physical_id = %physical_id, "resubscribed");

        if !plan.kind.supports_backfill() {
            return Ok(Vec::new());
        }

        self.backfill_with_retry(virtual_id, plan, token).await
    }

    /// Runs the backfill up to `backfill_attempts` times with capped doubling backoff.
    ///
    /// `backfill_timeout` bounds each attempt on its own, not the whole retry loop.
    async fn backfill_with_retry(
        &self,
        virtual_id: &str,
        plan: &BackfillPlan,
        token: &CancellationToken,
    ) -> Result<Vec<Value>, TetherError> {
        let attempts = self.config.backfill_attempts.max(1);
        let max_backoff = Duration::from_millis(self.config.backfill_max_backoff_ms);
        let mut backoff = Duration::from_millis(self.config.backfill_initial_backoff_ms);

        for attempt in 1..=attempts {
            let timeout = self.config.backfill_timeout();
            let error = match tokio::time::timeout(timeout, self.backfill_once(plan, token)).await {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(TetherError::Cancelled)) => return Err(TetherError::Cancelled),
                Ok(Err(error)) => error,
                Err(_) => TetherError::Timeout(timeout),
            };

            if attempt == attempts {
                return Err(error);
            }

            tracing::warn!(
                subscription = %virtual_id,
                attempt = attempt,
                max_attempts = attempts,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "backfill attempt failed"
            );

            tokio::select! {
                biased;
                () = token.cancelled() => return Err(TetherError::Cancelled),
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }

        Err(TetherError::BackfillFailure {
            subscription: virtual_id.to_string(),
            reason: "no backfill attempts made".to_string(),
        })
    }

    async fn backfill_once(
        &self,
        plan: &BackfillPlan,
        token: &CancellationToken,
    ) -> Result<Vec<Value>, TetherError> {
        let to = cancellable(token, self.rpc.block_number()).await?;
        let from = plan.starting_block;

        match &plan.kind {
            SubscriptionKind::NewHeads => {
                self.backfiller.new_heads_backfill(token, &plan.previous, from, to).await
            }
            SubscriptionKind::Logs(filter) => {
                self.backfiller.logs_backfill(token, filter, &plan.previous, from, to).await
            }
            SubscriptionKind::Other(_) => Ok(Vec::new()),
        }
    }
}
