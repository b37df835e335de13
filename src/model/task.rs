// src/model/task.rs
//! Tasks delivered by the matcher and the results produced for them

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Metadata key carrying the bid that won a task
pub const BID_ID_METADATA_KEY: &str = "bid_id";

/// A unit of work published by the matcher
///
/// Immutable once received; `deadline` is never earlier than `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique task ID
    pub id: String,

    /// Intent this task belongs to (groups bids and reports)
    pub intent_id: String,

    /// Type tag, matched against the agent's capabilities
    pub task_type: String,

    /// Opaque payload
    pub payload: Bytes,

    /// Free-form metadata
    pub metadata: HashMap<String, String>,

    /// When the matcher created the task
    pub created_at: DateTime<Utc>,

    /// Execution deadline
    pub deadline: DateTime<Utc>,
}

impl Task {
    /// Default lifetime for tasks built locally without an explicit deadline
    pub const DEFAULT_TTL_SECS: i64 = 30;

    pub fn new(
        id: impl Into<String>,
        intent_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            intent_id: intent_id.into(),
            task_type: task_type.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
            created_at: now,
            deadline: now + ChronoDuration::seconds(Self::DEFAULT_TTL_SECS),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.deadline = self.deadline.max(created_at);
        self
    }

    /// Set the deadline, clamped so it never precedes `created_at`
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = deadline.max(self.created_at);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = self.created_at
            + ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::seconds(0));
        self.with_deadline(deadline)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Time left before the deadline, `None` once it has passed
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.deadline - now).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_none()
    }

    pub fn bid_id(&self) -> Option<&str> {
        self.metadata.get(BID_ID_METADATA_KEY).map(String::as_str)
    }
}

/// Outcome of one handler invocation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskResult {
    pub success: bool,

    /// Opaque output
    pub output: Bytes,

    /// Error description for failed results
    pub error: Option<String>,

    /// Metadata merged into the execution report
    pub metadata: HashMap<String, String>,
}

impl TaskResult {
    pub const DEADLINE_EXCEEDED: &'static str = "deadline exceeded";

    pub fn success(output: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Synthetic result for invocations that outlived their deadline
    pub fn deadline_exceeded() -> Self {
        Self::failure(Self::DEADLINE_EXCEEDED)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
