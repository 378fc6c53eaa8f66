use serde_json::Value;
use std::collections::VecDeque;

use crate::backfill::{is_removal, EventFamily};

/// Number of blocks behind the latest delivered event that stay retained for reorg detection.
pub const RETAINED_EVENT_BLOCK_COUNT: u64 = 10;

/// Recently delivered events of one subscription, oldest first.
///
/// The history is what a backfill compares against the canonical chain, so it only has to
/// reach back as far as a reorg plausibly goes.
#[derive(Debug)]
pub struct EventHistory {
    family: EventFamily,
    events: VecDeque<Value>,
}

impl EventHistory {
    #[must_use]
    pub fn new(family: EventFamily) -> Self {
        Self { family, events: VecDeque::new() }
    }

    /// Records a delivered event.
    ///
    /// A removal drops the entry it invalidates. Events without a block number are not
    /// retained since they cannot take part in reorg detection.
    pub fn push(&mut self, event: &Value) {
        if is_removal(event) {
            if let Some(key) = self.family.identity_key(event) {
                let family = self.family;
                self.events.retain(|kept| family.identity_key(kept).as_deref() != Some(&key));
            }
            return;
        }

        let Some(latest) = self.family.block_number(event) else {
            tracing::debug!("event without block number not retained");
            return;
        };

        self.events.push_back(event.clone());

        let family = self.family;
        self.events.retain(|kept| {
            family
                .block_number(kept)
                .is_some_and(|block| block.saturating_add(RETAINED_EVENT_BLOCK_COUNT) > latest)
        });
    }

    /// Snapshot of the retained events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Value> {
        self.events.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
