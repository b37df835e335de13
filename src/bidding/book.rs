// src/bidding/book.rs
//! Active bids, one per intent
//!
//! A new bid on an intent replaces the previous entry; the caller decides
//! (via `RebidPolicy`) whether the superseded bid is also cancelled remotely.

use crate::model::{Bid, Task};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What happens to an outstanding bid when the same intent is bid on again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebidPolicy {
    /// Rely on the matcher to keep only the latest bid
    #[default]
    Supersede,

    /// Cancel the previous bid before submitting the new one
    CancelPrior,
}

/// A submitted bid awaiting its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBid {
    pub bid: Bid,
    pub task: Task,
}

/// Outstanding bids keyed by intent ID
#[derive(Debug, Default)]
pub struct BidBook {
    bids: DashMap<String, ActiveBid>,
}

impl BidBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bid, returning the one it supersedes
    pub fn place(&self, task: Task, bid: Bid) -> Option<ActiveBid> {
        let intent_id = bid.intent_id.clone();
        let previous = self.bids.insert(intent_id.clone(), ActiveBid { bid, task });
        if let Some(prev) = &previous {
            debug!("Bid {} on intent {} superseded", prev.bid.bid_id, intent_id);
        }
        previous
    }

    pub fn get(&self, intent_id: &str) -> Option<ActiveBid> {
        self.bids.get(intent_id).map(|entry| entry.value().clone())
    }

    /// Resolve a winning bid; `None` if the intent has no active bid
    pub fn take(&self, intent_id: &str) -> Option<ActiveBid> {
        self.bids.remove(intent_id).map(|(_, active)| active)
    }

    /// Drop bids whose task deadline has passed
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.bids.len();
        self.bids.retain(|_, active| !active.task.is_expired(now));
        before - self.bids.len()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    pub fn clear(&self) {
        self.bids.clear();
    }
}
