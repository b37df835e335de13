// src/model/mod.rs
//! Domain types shared by the runtime and its remote clients
//!
//! - **Task / TaskResult**: work delivered by the matcher and its outcome
//! - **Bid / BidAck / Assignment / TaskResponse**: bidding, win notifications
//!   and their acknowledgement
//! - **ExecutionReport / ExecutionReceipt**: results sent to validators
//! - **BatchRequest / BatchResponse**: batch submission shapes

pub mod batch;
pub mod bid;
pub mod report;
pub mod task;

pub use batch::{Acknowledgement, BatchRequest, BatchResponse};
pub use bid::{Assignment, Bid, BidAck, MatcherEvent, TaskResponse, TaskStreamRequest};
pub use report::{ExecutionReceipt, ExecutionReport, ReportStatus};
pub use task::{Task, TaskResult};
