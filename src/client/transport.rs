// src/client/transport.rs
//! Transport seam between the clients and the wire
//!
//! Clients own the semantics (signing, timeouts, batch reconciliation,
//! reconnects); transports only move signed messages. Batch RPCs default to
//! `Unimplemented`, which makes the clients submit the items one by one.

use crate::model::{
    BatchRequest, BatchResponse, Bid, BidAck, ExecutionReceipt, ExecutionReport, MatcherEvent,
    TaskResponse, TaskStreamRequest,
};
use crate::signing::RequestSignature;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Events from one live task-stream connection
pub type EventStream = BoxStream<'static, Result<MatcherEvent>>;

/// RPC method paths, also bound into request signatures
pub mod methods {
    pub const SUBMIT_BID: &str = "/subnet.v1.MatcherService/SubmitBid";
    pub const SUBMIT_BID_BATCH: &str = "/subnet.v1.MatcherService/SubmitBidBatch";
    pub const CANCEL_BID: &str = "/subnet.v1.MatcherService/CancelBid";
    pub const RESPOND_TO_TASK: &str = "/subnet.v1.MatcherService/RespondToTask";
    pub const STREAM_TASKS: &str = "/subnet.v1.MatcherService/StreamTasks";
    pub const SUBMIT_EXECUTION_REPORT: &str = "/subnet.v1.ValidatorService/SubmitExecutionReport";
    pub const SUBMIT_EXECUTION_REPORT_BATCH: &str =
        "/subnet.v1.ValidatorService/SubmitExecutionReportBatch";
}

/// Wire access to the matcher
#[async_trait]
pub trait MatcherTransport: Send + Sync {
    async fn submit_bid(&self, bid: &Bid, signature: &RequestSignature) -> Result<BidAck>;

    async fn submit_bid_batch(
        &self,
        _request: &BatchRequest<Bid>,
        _signature: &RequestSignature,
    ) -> Result<BatchResponse<BidAck>> {
        Err(AgentError::Unimplemented("SubmitBidBatch".to_string()))
    }

    async fn cancel_bid(
        &self,
        intent_id: &str,
        bid_id: &str,
        signature: &RequestSignature,
    ) -> Result<()>;

    /// Accept or decline an assignment
    async fn respond_to_task(
        &self,
        response: &TaskResponse,
        signature: &RequestSignature,
    ) -> Result<()>;

    /// Open a server-streaming subscription
    async fn open_task_stream(
        &self,
        request: &TaskStreamRequest,
        signature: &RequestSignature,
    ) -> Result<EventStream>;
}

/// Wire access to a validator
#[async_trait]
pub trait ValidatorTransport: Send + Sync {
    async fn submit_report(
        &self,
        report: &ExecutionReport,
        signature: &RequestSignature,
    ) -> Result<ExecutionReceipt>;

    async fn submit_report_batch(
        &self,
        _request: &BatchRequest<ExecutionReport>,
        _signature: &RequestSignature,
    ) -> Result<BatchResponse<ExecutionReceipt>> {
        Err(AgentError::Unimplemented("SubmitExecutionReportBatch".to_string()))
    }
}
