// src/model/bid.rs
//! Bids, bid acknowledgements and matcher events

use crate::model::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A priced offer to execute an intent
///
/// Metadata is ordered so the canonical encoding used for signing is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub bid_id: String,
    pub intent_id: String,
    pub agent_id: String,

    /// Price in the smallest unit of `currency`
    pub price: u64,
    pub currency: String,

    /// Submission time (seconds since epoch)
    pub submitted_at: i64,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Bid {
    pub fn new(
        intent_id: impl Into<String>,
        agent_id: impl Into<String>,
        price: u64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            bid_id: ulid::Ulid::new().to_string(),
            intent_id: intent_id.into(),
            agent_id: agent_id.into(),
            price,
            currency: currency.into(),
            submitted_at: chrono::Utc::now().timestamp(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_bid_id(mut self, bid_id: impl Into<String>) -> Self {
        self.bid_id = bid_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Matcher acknowledgement for a single bid
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BidAck {
    pub bid_id: String,
    pub accepted: bool,
    pub reason: String,
}

impl BidAck {
    pub fn accepted(bid_id: impl Into<String>) -> Self {
        Self {
            bid_id: bid_id.into(),
            accepted: true,
            reason: String::new(),
        }
    }

    pub fn rejected(bid_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            bid_id: bid_id.into(),
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// Win notification: the matcher authorised this agent to execute an intent
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub assignment_id: String,
    pub intent_id: String,
    pub bid_id: String,

    /// Task attached by the matcher, if the agent may not have seen the offer
    pub task: Option<Task>,
}

/// Agent's answer to an assignment, sent before execution starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub agent_id: String,
    pub accepted: bool,
    pub reason: String,

    /// Seconds since epoch
    pub timestamp: i64,
}

impl TaskResponse {
    pub fn accept(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            accepted: true,
            reason: String::new(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn decline(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            ..Self::accept(task_id, agent_id)
        }
    }
}

/// Items delivered on the matcher's task stream
#[derive(Debug, Clone, PartialEq)]
pub enum MatcherEvent {
    /// A task open for bidding
    Offer(Task),

    /// A bid won
    Assignment(Assignment),

    /// A bid lost or expired
    BidLost { intent_id: String, reason: String },
}

impl MatcherEvent {
    pub fn intent_id(&self) -> &str {
        match self {
            MatcherEvent::Offer(task) => &task.intent_id,
            MatcherEvent::Assignment(assignment) => &assignment.intent_id,
            MatcherEvent::BidLost { intent_id, .. } => intent_id,
        }
    }
}

/// Subscription request for the task stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStreamRequest {
    pub agent_id: String,
    pub subnet_id: String,
    pub capabilities: Vec<String>,
}
