// src/model/report.rs
//! Execution reports and validator receipts

use crate::model::bid::Assignment;
use crate::model::task::{Task, TaskResult, BID_ID_METADATA_KEY};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key for the failure description of a failed result
pub const ERROR_METADATA_KEY: &str = "error";

/// Terminal status reported to validators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failure,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Success => "success",
            ReportStatus::Failure => "failure",
        }
    }
}

/// Report of one executed task, derived 1:1 from the task and its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub report_id: String,

    /// Assignment issued by the matcher when the bid won
    pub assignment_id: String,
    pub intent_id: String,
    pub agent_id: String,
    pub status: ReportStatus,
    pub result_data: Bytes,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionReport {
    /// Build the report for a finished task
    ///
    /// Manual executions have no assignment; the task ID stands in for it.
    pub fn for_task(
        task: &Task,
        assignment: Option<&Assignment>,
        agent_id: &str,
        result: &TaskResult,
    ) -> Self {
        let mut metadata: BTreeMap<String, String> = result
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let bid_id = assignment
            .map(|a| a.bid_id.as_str())
            .or_else(|| task.bid_id());
        if let Some(bid_id) = bid_id.filter(|b| !b.is_empty()) {
            metadata.insert(BID_ID_METADATA_KEY.to_string(), bid_id.to_string());
        }
        if !result.success {
            if let Some(error) = &result.error {
                metadata.insert(ERROR_METADATA_KEY.to_string(), error.clone());
            }
        }

        Self {
            report_id: ulid::Ulid::new().to_string(),
            assignment_id: assignment
                .map(|a| a.assignment_id.clone())
                .unwrap_or_else(|| task.id.clone()),
            intent_id: task.intent_id.clone(),
            agent_id: agent_id.to_string(),
            status: if result.success {
                ReportStatus::Success
            } else {
                ReportStatus::Failure
            },
            result_data: result.output.clone(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Validator acknowledgement for a report
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionReceipt {
    pub report_id: String,
    pub intent_id: String,
    pub validator_id: String,
    pub accepted: bool,
    pub status: String,
    pub phase: String,
    pub message: String,
    pub received_at: Option<DateTime<Utc>>,
}

impl ExecutionReceipt {
    pub fn accepted(report_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            accepted: true,
            status: "accepted".to_string(),
            ..Default::default()
        }
    }

    pub fn rejected(report_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            accepted: false,
            status: "rejected".to_string(),
            message: message.into(),
            ..Default::default()
        }
    }
}
