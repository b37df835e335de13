// src/model/batch.rs
//! Batch submission request/response shapes

use crate::model::bid::BidAck;
use crate::model::report::ExecutionReceipt;
use serde::Serialize;

/// Per-item acknowledgement in a batch response
pub trait Acknowledgement {
    fn is_accepted(&self) -> bool;
}

impl Acknowledgement for BidAck {
    fn is_accepted(&self) -> bool {
        self.accepted
    }
}

impl Acknowledgement for ExecutionReceipt {
    fn is_accepted(&self) -> bool {
        self.accepted
    }
}

/// Ordered batch of bids or reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRequest<T> {
    pub batch_id: String,
    pub items: Vec<T>,

    /// Keep going after a failed item
    pub partial_ok: bool,
}

impl<T> BatchRequest<T> {
    pub fn new(items: Vec<T>, partial_ok: bool) -> Self {
        Self {
            batch_id: format!("batch-{}", ulid::Ulid::new()),
            items,
            partial_ok,
        }
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }
}

/// Outcome of a batch submission
///
/// With `partial_ok` the acks mirror the request one-to-one. Without it
/// they stop at the first failed item.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse<A> {
    pub batch_id: String,
    pub success: u32,
    pub failed: u32,
    pub msg: String,
    pub acks: Vec<A>,
}

impl<A: Acknowledgement> BatchResponse<A> {
    /// Tally acknowledgements collected in request order
    pub fn from_acks(batch_id: impl Into<String>, acks: Vec<A>, halted: bool) -> Self {
        let success = acks.iter().filter(|a| a.is_accepted()).count() as u32;
        let failed = acks.len() as u32 - success;
        let msg = if halted {
            format!("halted after {} item(s): {} accepted, {} failed", acks.len(), success, failed)
        } else {
            format!("{} accepted, {} failed", success, failed)
        };

        Self {
            batch_id: batch_id.into(),
            success,
            failed,
            msg,
            acks,
        }
    }

    pub fn all_accepted(&self) -> bool {
        self.failed == 0
    }
}
