// src/runtime/callbacks.rs
//! Lifecycle hooks for embedding applications
//!
//! Every method has a no-op default, so implementors override only the
//! events they care about. Hooks run inline on the runtime task that raised
//! the event; long work belongs in a spawned task.

use crate::model::{Task, TaskResult};
use crate::utils::errors::AgentError;
use async_trait::async_trait;

#[async_trait]
pub trait AgentCallbacks: Send + Sync {
    /// The runtime reached `Running`
    async fn on_start(&self) {}

    /// The runtime reached `Stopped`, after a stop or an abort
    async fn on_stop(&self) {}

    /// An assignment was confirmed to the matcher and queued
    async fn on_task_accepted(&self, _task: &Task) {}

    /// An assignment could not be confirmed and will not run
    async fn on_task_rejected(&self, _task: &Task, _reason: &str) {}

    async fn on_task_completed(&self, _task: &Task, _result: &TaskResult) {}

    async fn on_bid_submitted(&self, _intent_id: &str, _bid_id: &str) {}

    async fn on_bid_failed(&self, _intent_id: &str, _bid_id: &str, _reason: &str) {}

    async fn on_bid_won(&self, _intent_id: &str) {}

    async fn on_bid_lost(&self, _intent_id: &str, _reason: &str) {}

    async fn on_report_submitted(&self, _report_id: &str) {}

    async fn on_report_failed(&self, _report_id: &str, _error: &AgentError) {}

    /// Start failures and stream aborts
    async fn on_error(&self, _error: &AgentError) {}
}

/// Callbacks that ignore every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl AgentCallbacks for NoCallbacks {}


#[cfg(test)]
mod tests {
    use super::recording::RecordingCallbacks;
    use super::*;

    #[tokio::test]
    async fn test_defaults_are_no_ops() {
        let callbacks = NoCallbacks;
        let task = Task::new("t", "i", "compute", "");
        callbacks.on_start().await;
        callbacks.on_task_completed(&task, &TaskResult::failure("x")).await;
        callbacks.on_error(&AgentError::NotRunning).await;
    }

    #[tokio::test]
    async fn test_recording_callbacks() {
        let callbacks = RecordingCallbacks::default();
        let task = Task::new("t1", "i1", "compute", "");

        callbacks.on_task_accepted(&task).await;
        callbacks.on_task_completed(&task, &TaskResult::success("ok")).await;
        callbacks.on_bid_lost("i2", "outbid").await;

        assert_eq!(
            callbacks.events(),
            vec!["accepted:t1", "completed:t1:true", "lost:i2"]
        );
    }
}
