// src/client/validator.rs
//! Validator client: execution reports and report batches

use crate::client::batch::{reconcile, run_batch};
use crate::client::matcher::{with_timeout, DEFAULT_RPC_TIMEOUT};
use crate::client::transport::{methods, ValidatorTransport};
use crate::model::{BatchRequest, BatchResponse, ExecutionReceipt, ExecutionReport};
use crate::runtime::metrics::MetricsRegistry;
use crate::signing::SigningContext;
use crate::utils::errors::{AgentError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Signed access to one validator
///
/// Reports from concurrently finishing tasks go out concurrently.
pub struct ValidatorClient {
    transport: Arc<dyn ValidatorTransport>,
    signer: SigningContext,
    metrics: Option<Arc<MetricsRegistry>>,
    rpc_timeout: Duration,
}

impl ValidatorClient {
    pub fn new(transport: Arc<dyn ValidatorTransport>, signer: SigningContext) -> Self {
        Self {
            transport,
            signer,
            metrics: None,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Count accepted and failed reports, single or batched, in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Submit one report; a rejected receipt is a `Rejected` error
    pub async fn submit_execution_report(&self, report: &ExecutionReport) -> Result<ExecutionReceipt> {
        let result = self.send_report(report).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_report(result.is_ok());
        }
        result
    }

    async fn send_report(&self, report: &ExecutionReport) -> Result<ExecutionReceipt> {
        let signature = self
            .signer
            .sign_request(methods::SUBMIT_EXECUTION_REPORT, report)?;

        let receipt = with_timeout(
            self.rpc_timeout,
            "SubmitExecutionReport",
            self.transport.submit_report(report, &signature),
        )
        .await?;

        if !receipt.accepted {
            let reason = if receipt.message.is_empty() {
                format!("validator rejected report ({})", receipt.status)
            } else {
                receipt.message
            };
            warn!("Report {} for intent {} rejected: {}", report.report_id, report.intent_id, reason);
            return Err(AgentError::Rejected { reason });
        }

        debug!(
            "Report {} for intent {} accepted by {}",
            report.report_id, report.intent_id, receipt.validator_id
        );
        Ok(receipt)
    }

    /// Submit reports with `partial_ok` semantics
    ///
    /// Uses the validator's batch RPC, falling back to one report at a time
    /// when the validator does not implement it. A batch that fails as a
    /// whole counts every report as failed.
    pub async fn submit_report_batch(
        &self,
        request: &BatchRequest<ExecutionReport>,
    ) -> Result<BatchResponse<ExecutionReceipt>> {
        debug!(
            "Submitting report batch {} ({} reports, partial_ok={})",
            request.batch_id,
            request.items.len(),
            request.partial_ok
        );

        let result = self.send_report_batch(request).await;
        match &result {
            Ok(response) => self.record_reports(u64::from(response.success), u64::from(response.failed)),
            Err(_) => self.record_reports(0, request.items.len() as u64),
        }
        result
    }

    async fn send_report_batch(
        &self,
        request: &BatchRequest<ExecutionReport>,
    ) -> Result<BatchResponse<ExecutionReceipt>> {
        let signature = self
            .signer
            .sign_request(methods::SUBMIT_EXECUTION_REPORT_BATCH, request)?;
        let remote = with_timeout(
            self.rpc_timeout,
            "SubmitExecutionReportBatch",
            self.transport.submit_report_batch(request, &signature),
        )
        .await;

        match remote {
            Ok(response) => reconcile(request, response),
            Err(AgentError::Unimplemented(_)) => {
                debug!(
                    "Validator has no batch RPC, sending batch {} report by report",
                    request.batch_id
                );
                run_batch(
                    request,
                    |report: ExecutionReport| async move { self.send_report(&report).await },
                    |report, reason| ExecutionReceipt::rejected(report.report_id.clone(), reason),
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    fn record_reports(&self, accepted: u64, failed: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_report_batch(accepted, failed);
        }
    }
}
