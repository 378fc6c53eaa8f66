use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;

use crate::{
    backfill::{dedupe_by_key, EventFamily},
    errors::TetherError,
    history::EventHistory,
    types::{RequestId, SubscriptionEvent, SubscriptionKind},
};

/// Maximum number of pushes parked for connection-level ids that are not registered yet.
pub const ORPHAN_BUFFER_CAPACITY: usize = 256;

/// Connection lifecycle as seen by the subscription provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Down,
    /// Reconnected, resubscribing and backfilling at least one subscription.
    Backfilling,
}

/// What a resubscribe-and-backfill run needs, captured when it starts.
#[derive(Debug, Clone)]
pub(super) struct BackfillPlan {
    pub method: String,
    pub params: Vec<Value>,
    pub kind: SubscriptionKind,
    pub starting_block: u64,
    pub previous: Vec<Value>,
}

/// A caller-facing subscription that survives reconnects.
pub(super) struct VirtualSubscription {
    virtual_id: String,
    physical_id: String,
    method: String,
    params: Vec<Value>,
    kind: SubscriptionKind,
    family: Option<EventFamily>,
    starting_block: u64,
    history: Option<EventHistory>,
    buffer: Vec<Value>,
    backfilling: bool,
    sink: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl VirtualSubscription {
    pub fn new(
        id: String,
        method: String,
        params: Vec<Value>,
        starting_block: u64,
        sink: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Self {
        let kind = SubscriptionKind::from_params(&params);
        let family = EventFamily::of(&kind);
        Self {
            virtual_id: id.clone(),
            physical_id: id,
            method,
            params,
            kind,
            family,
            starting_block,
            history: family.map(EventHistory::new),
            buffer: Vec::new(),
            backfilling: false,
            sink,
        }
    }

    /// Routes a live event: buffered while backfilling, emitted otherwise.
    fn deliver(&mut self, result: Value) {
        if self.backfilling {
            self.buffer.push(result);
        } else {
            self.emit(result);
        }
    }

    fn emit(&mut self, result: Value) {
        if let Some(history) = &mut self.history {
            history.push(&result);
        }
        // A dropped handle only means nobody is listening anymore.
        let _ = self.sink.send(SubscriptionEvent { subscription: self.virtual_id.clone(), result });
    }

    pub fn begin_backfill(&mut self) -> BackfillPlan {
        self.backfilling = true;
        self.buffer.clear();
        BackfillPlan {
            method: self.method.clone(),
            params: self.params.clone(),
            kind: self.kind.clone(),
            starting_block: self.starting_block,
            previous: self.history.as_ref().map(EventHistory::events).unwrap_or_default(),
        }
    }

    /// Emits `[backfilled, buffered live]` without duplicates and resumes live delivery.
    ///
    /// `starting_block` is left alone: it stays the lower bound for a reorg that reaches
    /// past every retained event.
    pub fn finish_backfill(&mut self, backfilled: Vec<Value>) {
        let mut merged = backfilled;
        merged.append(&mut self.buffer);
        if let Some(family) = self.family {
            merged = dedupe_by_key(merged, family);
        }

        for event in merged {
            self.emit(event);
        }

        self.backfilling = false;
    }
}

/// Virtual subscriptions plus the physical-id index used to route pushes.
pub(super) struct Registry {
    subscriptions: HashMap<String, VirtualSubscription>,
    physical_index: HashMap<String, String>,
    orphans: VecDeque<SubscriptionEvent>,
    pub state: ConnectionState,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            physical_index: HashMap::new(),
            orphans: VecDeque::new(),
            state: ConnectionState::Connected,
        }
    }

    /// Registers a new subscription under its virtual id.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::SubscriptionIdCollision`] if the id is already in use as a virtual
    /// or physical id.
    pub fn insert(&mut self, subscription: VirtualSubscription) -> Result<(), TetherError> {
        let id = subscription.virtual_id.clone();
        if self.subscriptions.contains_key(&id) || self.physical_index.contains_key(&id) {
            return Err(TetherError::SubscriptionIdCollision { id: RequestId::String(id) });
        }

        self.physical_index.insert(id.clone(), id.clone());
        self.subscriptions.insert(id.clone(), subscription);
        self.drain_orphans(&id);
        Ok(())
    }

    /// Points `virtual_id` at a new connection-level id. Returns `false` if the subscription
    /// no longer exists.
    pub fn bind(&mut self, virtual_id: &str, physical_id: String) -> bool {
        let Some(subscription) = self.subscriptions.get_mut(virtual_id) else {
            return false;
        };

        let previous = std::mem::replace(&mut subscription.physical_id, physical_id.clone());
        self.physical_index.remove(&previous);
        self.physical_index.insert(physical_id.clone(), virtual_id.to_string());
        self.drain_orphans(&physical_id);
        true
    }

    /// Removes a subscription. Returns its current physical id.
    pub fn remove(&mut self, virtual_id: &str) -> Option<String> {
        let subscription = self.subscriptions.remove(virtual_id)?;
        self.physical_index.remove(&subscription.physical_id);
        Some(subscription.physical_id)
    }

    /// Routes a push by its connection-level id.
    pub fn route(&mut self, event: SubscriptionEvent) {
        let Some(virtual_id) = self.physical_index.get(&event.subscription) else {
            if self.orphans.len() == ORPHAN_BUFFER_CAPACITY {
                self.orphans.pop_front();
            }
            tracing::debug!(
                subscription = %event.subscription,
                "parking push for unknown subscription"
            );
            self.orphans.push_back(event);
            return;
        };

        if let Some(subscription) = self.subscriptions.get_mut(virtual_id) {
            subscription.deliver(event.result);
        }
    }

    fn drain_orphans(&mut self, physical_id: &str) {
        if self.orphans.is_empty() {
            return;
        }

        let (matching, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.orphans)
            .into_iter()
            .partition(|event| event.subscription == physical_id);
        self.orphans = rest;

        for event in matching {
            self.route(event);
        }
    }

    /// Drops every subscription, closing their event channels.
    pub fn clear_all(&mut self) {
        self.subscriptions.clear();
        self.clear_physical();
    }

    /// Forgets every connection-level id after a reconnect.
    pub fn clear_physical(&mut self) {
        self.physical_index.clear();
        self.orphans.clear();
    }

    pub fn get_mut(&mut self, virtual_id: &str) -> Option<&mut VirtualSubscription> {
        self.subscriptions.get_mut(virtual_id)
    }

    pub fn virtual_ids(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[cfg(test)]
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }
}
