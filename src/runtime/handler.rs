// src/runtime/handler.rs
//! Task handler contract and per-capability routing

use crate::model::{Task, TaskResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// User-supplied task logic
///
/// Returning `Err` produces a failed result; it never aborts the runtime.
/// Handlers must not block the async executor; they may be abandoned once
/// the task's deadline passes.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: Task) -> anyhow::Result<TaskResult>;
}

/// Routes each task to the handler registered for its type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Handler for task types without a dedicated entry
    pub fn with_fallback(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).or(self.fallback.as_ref())
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.fallback.is_none()
    }
}

#[async_trait]
impl TaskHandler for HandlerRegistry {
    async fn execute(&self, task: Task) -> anyhow::Result<TaskResult> {
        match self.get(&task.task_type) {
            Some(handler) => handler.execute(task).await,
            None => anyhow::bail!("no handler registered for task type '{}'", task.task_type),
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<TaskResult>> + Send + 'static,
{
    async fn execute(&self, task: Task) -> anyhow::Result<TaskResult> {
        (self)(task).await
    }
}
