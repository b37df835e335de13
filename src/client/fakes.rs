// src/client/fakes.rs
//! In-memory matcher and validator for tests

use crate::client::batch::run_batch;
use crate::client::transport::{EventStream, MatcherTransport, ValidatorTransport};
use crate::model::{
    BatchRequest, BatchResponse, Bid, BidAck, ExecutionReceipt, ExecutionReport, MatcherEvent,
    TaskResponse, TaskStreamRequest,
};
use crate::signing::{RequestSignature, SigningContext};
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub const TEST_KEY: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

pub fn signer() -> SigningContext {
    SigningContext::from_hex(TEST_KEY, "agent-1", "subnet-2").unwrap()
}

/// How the fake responds to a specific bid or report ID
#[derive(Debug, Clone)]
pub enum Failure {
    /// Negative acknowledgement
    Nack(String),

    /// `Rejected` error
    Reject(String),

    /// `Transport` error
    Transport(String),
}

impl Failure {
    fn into_error(self) -> AgentError {
        match self {
            Failure::Nack(reason) | Failure::Reject(reason) => AgentError::rejected(reason),
            Failure::Transport(msg) => AgentError::Transport(msg),
        }
    }
}

pub struct FakeMatcher {
    pub bids: Mutex<Vec<Bid>>,
    pub signatures: Mutex<Vec<RequestSignature>>,
    pub cancelled: Mutex<Vec<(String, String)>>,
    pub responses: Mutex<Vec<TaskResponse>>,

    /// `(batch_id, partial_ok)` of every batch RPC received
    pub batches: Mutex<Vec<(String, bool)>>,
    failures: Mutex<HashMap<String, Failure>>,
    reject_all: Mutex<Option<Failure>>,
    response_failure: Mutex<Option<Failure>>,
    streams: Mutex<VecDeque<mpsc::Receiver<Result<MatcherEvent>>>>,
    opens: AtomicUsize,
    batch_rpc: bool,
}

impl Default for FakeMatcher {
    fn default() -> Self {
        Self {
            bids: Mutex::default(),
            signatures: Mutex::default(),
            cancelled: Mutex::default(),
            responses: Mutex::default(),
            batches: Mutex::default(),
            failures: Mutex::default(),
            reject_all: Mutex::default(),
            response_failure: Mutex::default(),
            streams: Mutex::default(),
            opens: AtomicUsize::new(0),
            batch_rpc: true,
        }
    }
}

impl FakeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a matcher that predates `SubmitBidBatch`
    pub fn without_batch_rpc(mut self) -> Self {
        self.batch_rpc = false;
        self
    }

    /// Queue a stream for the next subscription; events are fed through the sender
    pub fn push_stream(&self) -> mpsc::Sender<Result<MatcherEvent>> {
        let (tx, rx) = mpsc::channel(64);
        self.streams.lock().push_back(rx);
        tx
    }

    pub fn fail_bid(&self, bid_id: impl Into<String>, failure: Failure) {
        self.failures.lock().insert(bid_id.into(), failure);
    }

    pub fn fail_all_bids(&self, failure: Failure) {
        *self.reject_all.lock() = Some(failure);
    }

    pub fn fail_task_responses(&self, failure: Failure) {
        *self.response_failure.lock() = Some(failure);
    }

    pub fn stream_opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn bid_count(&self) -> usize {
        self.bids.lock().len()
    }

    pub fn response_count(&self) -> usize {
        self.responses.lock().len()
    }

    /// Accepted and nacked bids are recorded; errors are not
    fn accept_bid(&self, bid: &Bid) -> Result<BidAck> {
        let failure = self
            .failures
            .lock()
            .get(&bid.bid_id)
            .cloned()
            .or_else(|| self.reject_all.lock().clone());

        match failure {
            Some(Failure::Nack(reason)) => {
                self.bids.lock().push(bid.clone());
                Ok(BidAck::rejected(bid.bid_id.clone(), reason))
            }
            Some(failure) => Err(failure.into_error()),
            None => {
                self.bids.lock().push(bid.clone());
                Ok(BidAck::accepted(bid.bid_id.clone()))
            }
        }
    }
}

#[async_trait]
impl MatcherTransport for FakeMatcher {
    async fn submit_bid(&self, bid: &Bid, signature: &RequestSignature) -> Result<BidAck> {
        self.signatures.lock().push(signature.clone());
        self.accept_bid(bid)
    }

    async fn submit_bid_batch(
        &self,
        request: &BatchRequest<Bid>,
        signature: &RequestSignature,
    ) -> Result<BatchResponse<BidAck>> {
        if !self.batch_rpc {
            return Err(AgentError::Unimplemented("SubmitBidBatch".into()));
        }
        self.signatures.lock().push(signature.clone());
        self.batches
            .lock()
            .push((request.batch_id.clone(), request.partial_ok));

        run_batch(
            request,
            |bid: Bid| async move { self.accept_bid(&bid) },
            |bid, reason| BidAck::rejected(bid.bid_id.clone(), reason),
        )
        .await
    }

    async fn cancel_bid(&self, intent_id: &str, bid_id: &str, _signature: &RequestSignature) -> Result<()> {
        self.cancelled
            .lock()
            .push((intent_id.to_string(), bid_id.to_string()));
        Ok(())
    }

    async fn respond_to_task(
        &self,
        response: &TaskResponse,
        _signature: &RequestSignature,
    ) -> Result<()> {
        if let Some(failure) = self.response_failure.lock().clone() {
            return Err(failure.into_error());
        }
        self.responses.lock().push(response.clone());
        Ok(())
    }

    async fn open_task_stream(
        &self,
        _request: &TaskStreamRequest,
        _signature: &RequestSignature,
    ) -> Result<EventStream> {
        let rx = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| AgentError::Transport("matcher unreachable".into()))?;
        self.opens.fetch_add(1, Ordering::SeqCst);

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

pub struct FakeValidator {
    pub reports: Mutex<Vec<ExecutionReport>>,

    /// `(batch_id, partial_ok)` of every batch RPC received
    pub batches: Mutex<Vec<(String, bool)>>,
    failures: Mutex<HashMap<String, Failure>>,
    reject_all: Mutex<Option<Failure>>,
    delay: Mutex<Option<Duration>>,
    batch_rpc: bool,
}

impl Default for FakeValidator {
    fn default() -> Self {
        Self {
            reports: Mutex::default(),
            batches: Mutex::default(),
            failures: Mutex::default(),
            reject_all: Mutex::default(),
            delay: Mutex::default(),
            batch_rpc: true,
        }
    }
}

impl FakeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a validator that predates `SubmitExecutionReportBatch`
    pub fn without_batch_rpc(mut self) -> Self {
        self.batch_rpc = false;
        self
    }

    pub fn fail_report(&self, report_id: impl Into<String>, failure: Failure) {
        self.failures.lock().insert(report_id.into(), failure);
    }

    pub fn fail_all(&self, failure: Failure) {
        *self.reject_all.lock() = Some(failure);
    }

    /// Hold every report this long before answering
    pub fn delay_reports(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().len()
    }

    fn accept_report(&self, report: &ExecutionReport) -> Result<ExecutionReceipt> {
        let failure = self
            .failures
            .lock()
            .get(&report.report_id)
            .cloned()
            .or_else(|| self.reject_all.lock().clone());

        match failure {
            Some(Failure::Nack(reason)) => Ok(ExecutionReceipt::rejected(report.report_id.clone(), reason)),
            Some(failure) => Err(failure.into_error()),
            None => {
                self.reports.lock().push(report.clone());
                Ok(ExecutionReceipt::accepted(report.report_id.clone()))
            }
        }
    }
}

#[async_trait]
impl ValidatorTransport for FakeValidator {
    async fn submit_report(
        &self,
        report: &ExecutionReport,
        _signature: &RequestSignature,
    ) -> Result<ExecutionReceipt> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.accept_report(report)
    }

    async fn submit_report_batch(
        &self,
        request: &BatchRequest<ExecutionReport>,
        _signature: &RequestSignature,
    ) -> Result<BatchResponse<ExecutionReceipt>> {
        if !self.batch_rpc {
            return Err(AgentError::Unimplemented("SubmitExecutionReportBatch".into()));
        }
        self.batches
            .lock()
            .push((request.batch_id.clone(), request.partial_ok));

        run_batch(
            request,
            |report: ExecutionReport| async move { self.accept_report(&report) },
            |report, reason| ExecutionReceipt::rejected(report.report_id.clone(), reason),
        )
        .await
    }
}
