// src/client/proto.rs
//! Wire messages for the `subnet.v1` matcher and validator services
//!
//! Declared with prost derives directly; field tags must stay stable.

use crate::model::{
    Assignment, BatchResponse, Bid, BidAck, ExecutionReceipt, ExecutionReport, MatcherEvent,
    ReportStatus, Task, TaskResponse, TaskStreamRequest,
};
use crate::utils::errors::{AgentError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BidMsg {
    #[prost(string, tag = "1")]
    pub bid_id: String,
    #[prost(string, tag = "2")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    pub agent_id: String,
    #[prost(uint64, tag = "4")]
    pub price: u64,
    #[prost(string, tag = "5")]
    pub currency: String,
    #[prost(int64, tag = "6")]
    pub submitted_at: i64,
    #[prost(map = "string, string", tag = "7")]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitBidRequest {
    #[prost(message, optional, tag = "1")]
    pub bid: Option<BidMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BidAckMsg {
    #[prost(string, tag = "1")]
    pub bid_id: String,
    #[prost(bool, tag = "2")]
    pub accepted: bool,
    #[prost(string, tag = "3")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitBidResponse {
    #[prost(message, optional, tag = "1")]
    pub ack: Option<BidAckMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitBidBatchRequest {
    #[prost(message, repeated, tag = "1")]
    pub bids: Vec<BidMsg>,
    #[prost(string, tag = "2")]
    pub batch_id: String,
    #[prost(bool, tag = "3")]
    pub partial_ok: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitBidBatchResponse {
    #[prost(message, repeated, tag = "1")]
    pub acks: Vec<BidAckMsg>,
    #[prost(uint32, tag = "2")]
    pub success: u32,
    #[prost(uint32, tag = "3")]
    pub failed: u32,
    #[prost(string, tag = "4")]
    pub msg: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelBidRequest {
    #[prost(string, tag = "1")]
    pub intent_id: String,
    #[prost(string, tag = "2")]
    pub bid_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelBidResponse {
    #[prost(bool, tag = "1")]
    pub cancelled: bool,
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskResponseMsg {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub agent_id: String,
    #[prost(bool, tag = "3")]
    pub accepted: bool,
    #[prost(string, tag = "4")]
    pub reason: String,
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RespondToTaskRequest {
    #[prost(message, optional, tag = "1")]
    pub response: Option<TaskResponseMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RespondToTaskResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamTasksRequest {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub subnet_id: String,
    #[prost(string, repeated, tag = "3")]
    pub capabilities: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionTaskMsg {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    pub task_type: String,
    #[prost(bytes = "bytes", tag = "4")]
    pub payload: ::prost::bytes::Bytes,
    #[prost(map = "string, string", tag = "5")]
    pub metadata: HashMap<String, String>,

    /// Seconds since epoch
    #[prost(int64, tag = "6")]
    pub created_at: i64,

    /// Seconds since epoch; 0 means unset
    #[prost(int64, tag = "7")]
    pub deadline: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssignmentMsg {
    #[prost(string, tag = "1")]
    pub assignment_id: String,
    #[prost(string, tag = "2")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    pub bid_id: String,
    #[prost(message, optional, tag = "4")]
    pub task: Option<ExecutionTaskMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BidOutcomeMsg {
    #[prost(string, tag = "1")]
    pub intent_id: String,
    #[prost(string, tag = "2")]
    pub bid_id: String,
    #[prost(string, tag = "3")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskStreamEvent {
    #[prost(oneof = "task_stream_event::Event", tags = "1, 2, 3")]
    pub event: Option<task_stream_event::Event>,
}

pub mod task_stream_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        Task(super::ExecutionTaskMsg),
        #[prost(message, tag = "2")]
        Assignment(super::AssignmentMsg),
        #[prost(message, tag = "3")]
        BidLost(super::BidOutcomeMsg),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReportStatusMsg {
    Unspecified = 0,
    Success = 1,
    Failure = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionReportMsg {
    #[prost(string, tag = "1")]
    pub report_id: String,
    #[prost(string, tag = "2")]
    pub assignment_id: String,
    #[prost(string, tag = "3")]
    pub intent_id: String,
    #[prost(string, tag = "4")]
    pub agent_id: String,
    #[prost(enumeration = "ReportStatusMsg", tag = "5")]
    pub status: i32,
    #[prost(bytes = "bytes", tag = "6")]
    pub result_data: ::prost::bytes::Bytes,
    #[prost(int64, tag = "7")]
    pub timestamp: i64,
    #[prost(map = "string, string", tag = "8")]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitExecutionReportRequest {
    #[prost(message, optional, tag = "1")]
    pub report: Option<ExecutionReportMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReceiptMsg {
    #[prost(string, tag = "1")]
    pub report_id: String,
    #[prost(string, tag = "2")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    pub validator_id: String,
    #[prost(bool, tag = "4")]
    pub accepted: bool,
    #[prost(string, tag = "5")]
    pub status: String,
    #[prost(string, tag = "6")]
    pub phase: String,
    #[prost(string, tag = "7")]
    pub message: String,

    /// Seconds since epoch; 0 means unset
    #[prost(int64, tag = "8")]
    pub received_at: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionReportBatchRequest {
    #[prost(message, repeated, tag = "1")]
    pub reports: Vec<ExecutionReportMsg>,
    #[prost(string, tag = "2")]
    pub batch_id: String,
    #[prost(bool, tag = "3")]
    pub partial_ok: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionReportBatchResponse {
    #[prost(message, repeated, tag = "1")]
    pub receipts: Vec<ReceiptMsg>,
    #[prost(uint32, tag = "2")]
    pub success: u32,
    #[prost(uint32, tag = "3")]
    pub failed: u32,
    #[prost(string, tag = "4")]
    pub msg: String,
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs, 0)
}

impl From<&Bid> for BidMsg {
    fn from(bid: &Bid) -> Self {
        Self {
            bid_id: bid.bid_id.clone(),
            intent_id: bid.intent_id.clone(),
            agent_id: bid.agent_id.clone(),
            price: bid.price,
            currency: bid.currency.clone(),
            submitted_at: bid.submitted_at,
            metadata: bid.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

impl From<BidAckMsg> for BidAck {
    fn from(msg: BidAckMsg) -> Self {
        Self {
            bid_id: msg.bid_id,
            accepted: msg.accepted,
            reason: msg.reason,
        }
    }
}

impl From<SubmitBidBatchResponse> for BatchResponse<BidAck> {
    /// The batch ID is not echoed on the wire; callers restore it.
    fn from(msg: SubmitBidBatchResponse) -> Self {
        Self {
            batch_id: String::new(),
            success: msg.success,
            failed: msg.failed,
            msg: msg.msg,
            acks: msg.acks.into_iter().map(BidAck::from).collect(),
        }
    }
}

impl From<&TaskResponse> for TaskResponseMsg {
    fn from(response: &TaskResponse) -> Self {
        Self {
            task_id: response.task_id.clone(),
            agent_id: response.agent_id.clone(),
            accepted: response.accepted,
            reason: response.reason.clone(),
            timestamp: response.timestamp,
        }
    }
}

impl From<&TaskStreamRequest> for StreamTasksRequest {
    fn from(request: &TaskStreamRequest) -> Self {
        Self {
            agent_id: request.agent_id.clone(),
            subnet_id: request.subnet_id.clone(),
            capabilities: request.capabilities.clone(),
        }
    }
}

impl From<ExecutionTaskMsg> for Task {
    /// A missing creation time means "now"; a missing deadline means the
    /// default TTL after creation.
    fn from(msg: ExecutionTaskMsg) -> Self {
        let mut task = Task::new(msg.task_id, msg.intent_id, msg.task_type, msg.payload);
        task.metadata = msg.metadata;

        if let Some(created_at) = timestamp(msg.created_at) {
            task = task.with_created_at(created_at);
        }
        let deadline = timestamp(msg.deadline).unwrap_or_else(|| {
            task.created_at + chrono::Duration::seconds(Task::DEFAULT_TTL_SECS)
        });
        task.with_deadline(deadline)
    }
}

impl From<AssignmentMsg> for Assignment {
    fn from(msg: AssignmentMsg) -> Self {
        Self {
            assignment_id: msg.assignment_id,
            intent_id: msg.intent_id,
            bid_id: msg.bid_id,
            task: msg.task.map(Task::from),
        }
    }
}

impl TryFrom<TaskStreamEvent> for MatcherEvent {
    type Error = AgentError;

    fn try_from(msg: TaskStreamEvent) -> Result<Self> {
        use task_stream_event::Event;

        match msg.event {
            Some(Event::Task(task)) => Ok(MatcherEvent::Offer(task.into())),
            Some(Event::Assignment(assignment)) => Ok(MatcherEvent::Assignment(assignment.into())),
            Some(Event::BidLost(outcome)) => Ok(MatcherEvent::BidLost {
                intent_id: outcome.intent_id,
                reason: outcome.reason,
            }),
            None => Err(AgentError::Stream("empty task stream event".to_string())),
        }
    }
}

impl From<&ExecutionReport> for ExecutionReportMsg {
    fn from(report: &ExecutionReport) -> Self {
        let status = match report.status {
            ReportStatus::Success => ReportStatusMsg::Success,
            ReportStatus::Failure => ReportStatusMsg::Failure,
        };

        Self {
            report_id: report.report_id.clone(),
            assignment_id: report.assignment_id.clone(),
            intent_id: report.intent_id.clone(),
            agent_id: report.agent_id.clone(),
            status: status as i32,
            result_data: report.result_data.clone(),
            timestamp: report.timestamp.timestamp(),
            metadata: report.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

impl From<ReceiptMsg> for ExecutionReceipt {
    fn from(msg: ReceiptMsg) -> Self {
        Self {
            report_id: msg.report_id,
            intent_id: msg.intent_id,
            validator_id: msg.validator_id,
            accepted: msg.accepted,
            status: msg.status,
            phase: msg.phase,
            message: msg.message,
            received_at: timestamp(msg.received_at),
        }
    }
}

impl From<ExecutionReportBatchResponse> for BatchResponse<ExecutionReceipt> {
    fn from(msg: ExecutionReportBatchResponse) -> Self {
        Self {
            batch_id: String::new(),
            success: msg.success,
            failed: msg.failed,
            msg: msg.msg,
            acks: msg.receipts.into_iter().map(ExecutionReceipt::from).collect(),
        }
    }
}
