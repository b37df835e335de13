// src/client/matcher.rs
//! Matcher client: bids, bid batches, task responses and the task stream

use crate::client::batch::{reconcile, run_batch};
use crate::client::stream::{open_stream, TaskStream};
use crate::client::transport::{methods, MatcherTransport};
use crate::model::{BatchRequest, BatchResponse, Bid, BidAck, TaskResponse, TaskStreamRequest};
use crate::runtime::metrics::MetricsRegistry;
use crate::signing::SigningContext;
use crate::utils::errors::{AgentError, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-RPC timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay before the task stream reconnects
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct CancelBidRequest<'a> {
    intent_id: &'a str,
    bid_id: &'a str,
}

/// Run `fut` under `timeout`, mapping expiry to a transport error
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| AgentError::Transport(format!("{} timed out after {:?}", what, timeout)))?
}

/// Signed access to the matcher service
///
/// All calls share the transport's connection. The tonic channel writes
/// each message as whole HTTP/2 frames, so concurrent submissions never
/// interleave on the wire and the task stream reads independently.
pub struct MatcherClient {
    transport: Arc<dyn MatcherTransport>,
    signer: SigningContext,
    metrics: Option<Arc<MetricsRegistry>>,
    rpc_timeout: Duration,
    reconnect_backoff: Duration,
}

impl MatcherClient {
    pub fn new(transport: Arc<dyn MatcherTransport>, signer: SigningContext) -> Self {
        Self {
            transport,
            signer,
            metrics: None,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Count acknowledged bids, single or batched, in `metrics`
    ///
    /// Transport failures are not counted as submitted.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Submit one bid; a negative acknowledgement is a `Rejected` error
    pub async fn submit_bid(&self, bid: &Bid) -> Result<BidAck> {
        let result = self.send_bid(bid).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.record_bid_submitted(),
                Err(AgentError::Rejected { .. }) => {
                    metrics.record_bid_submitted();
                    metrics.record_bid_rejected();
                }
                Err(_) => {}
            }
        }
        result
    }

    async fn send_bid(&self, bid: &Bid) -> Result<BidAck> {
        let signature = self.signer.sign_request(methods::SUBMIT_BID, bid)?;
        let ack = with_timeout(
            self.rpc_timeout,
            "SubmitBid",
            self.transport.submit_bid(bid, &signature),
        )
        .await?;

        if !ack.accepted {
            let reason = if ack.reason.is_empty() {
                "matcher rejected bid".to_string()
            } else {
                ack.reason
            };
            warn!("Bid {} on intent {} rejected: {}", bid.bid_id, bid.intent_id, reason);
            return Err(AgentError::Rejected { reason });
        }

        debug!("Bid {} on intent {} accepted", bid.bid_id, bid.intent_id);
        Ok(ack)
    }

    /// Withdraw an outstanding bid
    pub async fn cancel_bid(&self, intent_id: &str, bid_id: &str) -> Result<()> {
        let request = CancelBidRequest { intent_id, bid_id };
        let signature = self.signer.sign_request(methods::CANCEL_BID, &request)?;

        with_timeout(
            self.rpc_timeout,
            "CancelBid",
            self.transport.cancel_bid(intent_id, bid_id, &signature),
        )
        .await?;

        debug!("Cancelled bid {} on intent {}", bid_id, intent_id);
        Ok(())
    }

    /// Tell the matcher whether this agent takes an assigned task
    pub async fn respond_to_task(&self, response: &TaskResponse) -> Result<()> {
        let signature = self.signer.sign_request(methods::RESPOND_TO_TASK, response)?;

        with_timeout(
            self.rpc_timeout,
            "RespondToTask",
            self.transport.respond_to_task(response, &signature),
        )
        .await?;

        debug!(
            "Responded to task {} (accepted={})",
            response.task_id, response.accepted
        );
        Ok(())
    }

    /// Submit bids with `partial_ok` semantics
    ///
    /// Uses the matcher's batch RPC, falling back to one `SubmitBid` per
    /// item when the matcher does not implement it.
    pub async fn submit_bid_batch(&self, request: &BatchRequest<Bid>) -> Result<BatchResponse<BidAck>> {
        debug!(
            "Submitting bid batch {} ({} bids, partial_ok={})",
            request.batch_id,
            request.items.len(),
            request.partial_ok
        );

        let signature = self.signer.sign_request(methods::SUBMIT_BID_BATCH, request)?;
        let remote = with_timeout(
            self.rpc_timeout,
            "SubmitBidBatch",
            self.transport.submit_bid_batch(request, &signature),
        )
        .await;

        let response = match remote {
            Ok(response) => reconcile(request, response)?,
            Err(AgentError::Unimplemented(_)) => {
                debug!("Matcher has no batch RPC, sending batch {} bid by bid", request.batch_id);
                run_batch(
                    request,
                    |bid: Bid| async move { self.send_bid(&bid).await },
                    |bid, reason| BidAck::rejected(bid.bid_id.clone(), reason),
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_bid_batch(response.acks.len() as u64, u64::from(response.failed));
        }
        Ok(response)
    }

    /// Subscribe to the matcher's task stream
    ///
    /// Failing to open the initial connection is a `Transport` error; later
    /// disconnections are handled by the returned stream.
    pub async fn stream_tasks(&self, request: TaskStreamRequest) -> Result<TaskStream> {
        let initial = open_stream(self.transport.as_ref(), &self.signer, &request).await?;
        debug!("Task stream opened for agent {}", request.agent_id);

        Ok(TaskStream::spawn(
            Arc::clone(&self.transport),
            self.signer.clone(),
            request,
            initial,
            self.reconnect_backoff,
        ))
    }
}
