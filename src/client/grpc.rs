// src/client/grpc.rs
//! tonic transports for the matcher and validator services
//!
//! Channels connect lazily, so building a transport never touches the
//! network. Plaintext HTTP/2 only.

use crate::client::proto::{
    BidAckMsg, BidMsg, CancelBidRequest, CancelBidResponse, ExecutionReportBatchRequest,
    ExecutionReportBatchResponse, ExecutionReportMsg, ReceiptMsg, RespondToTaskRequest,
    RespondToTaskResponse, StreamTasksRequest, SubmitBidBatchRequest, SubmitBidBatchResponse,
    SubmitBidRequest, SubmitBidResponse, SubmitExecutionReportRequest, TaskResponseMsg,
    TaskStreamEvent,
};
use crate::client::transport::{methods, EventStream, MatcherTransport, ValidatorTransport};
use crate::model::{
    BatchRequest, BatchResponse, Bid, BidAck, ExecutionReceipt, ExecutionReport, MatcherEvent,
    TaskResponse, TaskStreamRequest,
};
use crate::signing::{
    RequestSignature, CHAIN_ID_HEADER, SIGNATURE_HEADER, SIGNER_ID_HEADER, TIMESTAMP_HEADER,
};
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Connection timeout for lazily established channels
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a lazily connecting channel to `addr` (scheme optional)
pub fn connect_lazy(addr: &str) -> Result<Channel> {
    let uri = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };

    let endpoint = Endpoint::from_shared(uri.clone())?
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_nodelay(true);

    debug!("Configured gRPC channel to {}", uri);
    Ok(endpoint.connect_lazy())
}

/// Attach signature material as request metadata
fn signed<T>(message: T, signature: &RequestSignature) -> Result<tonic::Request<T>> {
    let mut request = tonic::Request::new(message);
    let metadata = request.metadata_mut();

    let entries = [
        (SIGNATURE_HEADER, signature.signature_hex()),
        (SIGNER_ID_HEADER, signature.signer_id.clone()),
        (CHAIN_ID_HEADER, signature.chain_id.clone()),
        (TIMESTAMP_HEADER, signature.timestamp.to_string()),
    ];
    for (key, value) in entries {
        let value = MetadataValue::try_from(value)
            .map_err(|e| AgentError::Transport(format!("invalid {} metadata: {}", key, e)))?;
        metadata.insert(key, value);
    }

    Ok(request)
}

async fn ready(channel: &Channel) -> Result<Grpc<Channel>> {
    let mut grpc = Grpc::new(channel.clone());
    grpc.ready()
        .await
        .map_err(|e| AgentError::Transport(format!("service not ready: {}", e)))?;
    Ok(grpc)
}

/// Matcher service over tonic
#[derive(Debug, Clone)]
pub struct GrpcMatcherTransport {
    channel: Channel,
}

impl GrpcMatcherTransport {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn connect_lazy(addr: &str) -> Result<Self> {
        Ok(Self::new(connect_lazy(addr)?))
    }
}

#[async_trait]
impl MatcherTransport for GrpcMatcherTransport {
    async fn submit_bid(&self, bid: &Bid, signature: &RequestSignature) -> Result<BidAck> {
        let request = signed(
            SubmitBidRequest {
                bid: Some(BidMsg::from(bid)),
            },
            signature,
        )?;

        let mut grpc = ready(&self.channel).await?;
        let response: tonic::Response<SubmitBidResponse> = grpc
            .unary(
                request,
                PathAndQuery::from_static(methods::SUBMIT_BID),
                ProstCodec::<SubmitBidRequest, SubmitBidResponse>::default(),
            )
            .await?;

        let ack: BidAckMsg = response
            .into_inner()
            .ack
            .ok_or_else(|| AgentError::Transport("SubmitBid response without ack".to_string()))?;
        Ok(ack.into())
    }

    async fn submit_bid_batch(
        &self,
        batch: &BatchRequest<Bid>,
        signature: &RequestSignature,
    ) -> Result<BatchResponse<BidAck>> {
        let request = signed(
            SubmitBidBatchRequest {
                bids: batch.items.iter().map(BidMsg::from).collect(),
                batch_id: batch.batch_id.clone(),
                partial_ok: batch.partial_ok,
            },
            signature,
        )?;

        let mut grpc = ready(&self.channel).await?;
        let response: tonic::Response<SubmitBidBatchResponse> = grpc
            .unary(
                request,
                PathAndQuery::from_static(methods::SUBMIT_BID_BATCH),
                ProstCodec::<SubmitBidBatchRequest, SubmitBidBatchResponse>::default(),
            )
            .await?;

        let mut response = BatchResponse::from(response.into_inner());
        response.batch_id = batch.batch_id.clone();
        Ok(response)
    }

    async fn cancel_bid(
        &self,
        intent_id: &str,
        bid_id: &str,
        signature: &RequestSignature,
    ) -> Result<()> {
        let request = signed(
            CancelBidRequest {
                intent_id: intent_id.to_string(),
                bid_id: bid_id.to_string(),
            },
            signature,
        )?;

        let mut grpc = ready(&self.channel).await?;
        let response: tonic::Response<CancelBidResponse> = grpc
            .unary(
                request,
                PathAndQuery::from_static(methods::CANCEL_BID),
                ProstCodec::<CancelBidRequest, CancelBidResponse>::default(),
            )
            .await?;

        let response = response.into_inner();
        if !response.cancelled {
            return Err(AgentError::rejected(response.reason));
        }
        Ok(())
    }

    async fn respond_to_task(
        &self,
        response: &TaskResponse,
        signature: &RequestSignature,
    ) -> Result<()> {
        let request = signed(
            RespondToTaskRequest {
                response: Some(TaskResponseMsg::from(response)),
            },
            signature,
        )?;

        let mut grpc = ready(&self.channel).await?;
        let reply: tonic::Response<RespondToTaskResponse> = grpc
            .unary(
                request,
                PathAndQuery::from_static(methods::RESPOND_TO_TASK),
                ProstCodec::<RespondToTaskRequest, RespondToTaskResponse>::default(),
            )
            .await?;

        let reply = reply.into_inner();
        if !reply.success {
            return Err(AgentError::rejected(reply.message));
        }
        Ok(())
    }

    async fn open_task_stream(
        &self,
        request: &TaskStreamRequest,
        signature: &RequestSignature,
    ) -> Result<EventStream> {
        let request = signed(StreamTasksRequest::from(request), signature)?;

        let mut grpc = ready(&self.channel).await?;
        let response: tonic::Response<tonic::Streaming<TaskStreamEvent>> = grpc
            .server_streaming(
                request,
                PathAndQuery::from_static(methods::STREAM_TASKS),
                ProstCodec::<StreamTasksRequest, TaskStreamEvent>::default(),
            )
            .await?;

        Ok(response
            .into_inner()
            .map(|item| item.map_err(AgentError::from).and_then(MatcherEvent::try_from))
            .boxed())
    }
}

/// Validator service over tonic
#[derive(Debug, Clone)]
pub struct GrpcValidatorTransport {
    channel: Channel,
}

impl GrpcValidatorTransport {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn connect_lazy(addr: &str) -> Result<Self> {
        Ok(Self::new(connect_lazy(addr)?))
    }
}

#[async_trait]
impl ValidatorTransport for GrpcValidatorTransport {
    async fn submit_report(
        &self,
        report: &ExecutionReport,
        signature: &RequestSignature,
    ) -> Result<ExecutionReceipt> {
        let request = signed(
            SubmitExecutionReportRequest {
                report: Some(ExecutionReportMsg::from(report)),
            },
            signature,
        )?;

        let mut grpc = ready(&self.channel).await?;
        let response: tonic::Response<ReceiptMsg> = grpc
            .unary(
                request,
                PathAndQuery::from_static(methods::SUBMIT_EXECUTION_REPORT),
                ProstCodec::<SubmitExecutionReportRequest, ReceiptMsg>::default(),
            )
            .await?;

        Ok(response.into_inner().into())
    }

    async fn submit_report_batch(
        &self,
        batch: &BatchRequest<ExecutionReport>,
        signature: &RequestSignature,
    ) -> Result<BatchResponse<ExecutionReceipt>> {
        let request = signed(
            ExecutionReportBatchRequest {
                reports: batch.items.iter().map(ExecutionReportMsg::from).collect(),
                batch_id: batch.batch_id.clone(),
                partial_ok: batch.partial_ok,
            },
            signature,
        )?;

        let mut grpc = ready(&self.channel).await?;
        let response: tonic::Response<ExecutionReportBatchResponse> = grpc
            .unary(
                request,
                PathAndQuery::from_static(methods::SUBMIT_EXECUTION_REPORT_BATCH),
                ProstCodec::<ExecutionReportBatchRequest, ExecutionReportBatchResponse>::default(),
            )
            .await?;

        let mut response = BatchResponse::from(response.into_inner());
        response.batch_id = batch.batch_id.clone();
        Ok(response)
    }
}
