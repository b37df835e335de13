// src/runtime/executor.rs
//! Bounded, deadline-aware task execution
//!
//! At most `max_concurrent` handler invocations run at once; callers beyond
//! that wait for a slot in arrival order. Each invocation runs on its own
//! tokio task and is raced against the task deadline (capped by the task
//! timeout). When the timer wins the invocation is aborted and a synthetic
//! "deadline exceeded" result is produced.

use crate::model::{Task, TaskResult};
use crate::runtime::handler::TaskHandler;
use crate::runtime::metrics::MetricsRegistry;
use crate::utils::errors::{AgentError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Reserved execution capacity for one task
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the running count however the invocation ends
struct RunningGuard<'a> {
    running: &'a watch::Sender<usize>,
    metrics: &'a MetricsRegistry,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a watch::Sender<usize>, metrics: &'a MetricsRegistry) -> Self {
        running.send_modify(|n| *n += 1);
        metrics.task_started();
        Self { running, metrics }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.send_modify(|n| *n = n.saturating_sub(1));
        self.metrics.task_finished();
    }
}

pub struct TaskExecutor {
    handler: Arc<dyn TaskHandler>,
    metrics: Arc<MetricsRegistry>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    task_timeout: Duration,
    running: watch::Sender<usize>,
}

impl TaskExecutor {
    pub fn new(
        handler: Arc<dyn TaskHandler>,
        metrics: Arc<MetricsRegistry>,
        max_concurrent: usize,
        task_timeout: Duration,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (running, _) = watch::channel(0);

        Self {
            handler,
            metrics,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            task_timeout,
            running,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Handler invocations currently in progress
    pub fn running(&self) -> usize {
        *self.running.borrow()
    }

    /// Wait for a free slot (FIFO)
    pub async fn reserve(&self) -> Result<Slot> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| AgentError::NotRunning)?;
        Ok(Slot { _permit: permit })
    }

    /// Reserve a slot and run `task`
    pub async fn execute(&self, task: Task) -> Result<TaskResult> {
        let slot = self.reserve().await?;
        Ok(self.run(slot, task).await)
    }

    /// Run `task` in a reserved slot
    ///
    /// Never fails: handler errors, panics and deadline expiry all become
    /// failed results. Metrics are recorded exactly once.
    pub async fn run(&self, slot: Slot, task: Task) -> TaskResult {
        let _slot = slot;
        let _running = RunningGuard::enter(&self.running, &self.metrics);
        let started = Instant::now();
        let task_id = task.id.clone();

        let result = match task.remaining(Utc::now()) {
            None => {
                warn!("Task {} reached the executor past its deadline", task_id);
                TaskResult::deadline_exceeded()
            }
            Some(remaining) => {
                let budget = remaining.min(self.task_timeout);
                self.invoke(task, budget).await
            }
        };

        let elapsed = started.elapsed();
        self.metrics.record_task(result.success, elapsed);
        debug!(
            "Task {} finished in {:?} (success={})",
            task_id, elapsed, result.success
        );

        result
    }

    async fn invoke(&self, task: Task, budget: Duration) -> TaskResult {
        let task_id = task.id.clone();
        let handler = Arc::clone(&self.handler);
        let mut invocation = tokio::spawn(async move { handler.execute(task).await });

        match tokio::time::timeout(budget, &mut invocation).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!("Handler failed for task {}: {:#}", task_id, e);
                TaskResult::failure(format!("{:#}", e))
            }
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "handler panicked"
                } else {
                    "handler cancelled"
                };
                warn!("Task {}: {}", task_id, reason);
                TaskResult::failure(reason)
            }
            Err(_) => {
                invocation.abort();
                warn!("Task {} exceeded its deadline after {:?}", task_id, budget);
                TaskResult::deadline_exceeded()
            }
        }
    }

    /// Wait until no invocation is running
    pub async fn drain(&self) {
        let mut running = self.running.subscribe();
        // The sender lives in `self`, so this only ends once the count hits zero.
        let _ = running.wait_for(|n| *n == 0).await;
    }

    /// Refuse further reservations; running invocations are unaffected
    pub fn close(&self) {
        self.slots.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps for the duration encoded in the payload, tracking concurrency
    #[derive(Default)]
    struct Sleeper {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Sleeper {
        async fn execute(&self, task: Task) -> anyhow::Result<TaskResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let millis: u64 = std::str::from_utf8(&task.payload)?.parse()?;
            tokio::time::sleep(Duration::from_millis(millis)).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(TaskResult::success(task.id))
        }
    }

    fn executor(handler: Arc<dyn TaskHandler>, max: usize) -> (Arc<TaskExecutor>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let executor = TaskExecutor::new(handler, metrics.clone(), max, Duration::from_secs(30));
        (Arc::new(executor), metrics)
    }

    fn task(id: &str, sleep_ms: u64) -> Task {
        Task::new(id, format!("intent-{}", id), "sleep", sleep_ms.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let sleeper = Arc::new(Sleeper::default());
        let (executor, metrics) = executor(sleeper.clone(), 2);

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let executor = executor.clone();
                tokio::spawn(async move { executor.execute(task(&i.to_string(), 100)).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().success);
        }

        assert_eq!(sleeper.peak.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.get_stats().0, 5);
        assert_eq!(executor.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_slow_handler() {
        let sleeper = Arc::new(Sleeper::default());
        let (executor, metrics) = executor(sleeper, 1);

        let slow = task("slow", 60_000).with_timeout(Duration::from_millis(50));
        let result = executor.execute(slow).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(TaskResult::DEADLINE_EXCEEDED));
        assert_eq!(metrics.get_stats().1, 1);
    }

    #[tokio::test]
    async fn test_expired_task_skips_handler() {
        let sleeper = Arc::new(Sleeper::default());
        let (executor, metrics) = executor(sleeper.clone(), 1);

        let created = Utc::now() - chrono::Duration::seconds(60);
        let stale = task("stale", 0)
            .with_created_at(created)
            .with_deadline(created + chrono::Duration::seconds(1));
        let result = executor.execute(stale).await.unwrap();

        assert!(!result.success);
        assert_eq!(sleeper.calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.get_stats(), (0, 1, 0, 0));
    }

    #[tokio::test]
    async fn test_handler_errors_become_failed_results() {
        let sleeper = Arc::new(Sleeper::default());
        let (executor, _) = executor(sleeper, 1);

        let result = executor
            .execute(Task::new("bad", "intent-bad", "sleep", "not-a-number"))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid digit"));
    }

    #[tokio::test]
    async fn test_panicking_handler() {
        let (executor, metrics) = executor(
            Arc::new(|_task: Task| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, anyhow::Error>(TaskResult::success(""))
            }),
            1,
        );

        let result = executor.execute(task("p", 0)).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("handler panicked"));
        assert_eq!(metrics.get_stats().1, 1);
        assert_eq!(metrics.snapshot().tasks_in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_running_tasks() {
        let sleeper = Arc::new(Sleeper::default());
        let (executor, _) = executor(sleeper, 2);

        let background = executor.clone();
        let handle = tokio::spawn(async move { background.execute(task("d", 200)).await });
        tokio::task::yield_now().await;

        executor.drain().await;
        assert_eq!(executor.running(), 0);
        assert!(handle.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_closed_executor_refuses_work() {
        let (executor, _) = executor(Arc::new(Sleeper::default()), 1);
        executor.close();
        assert!(matches!(
            executor.execute(task("late", 0)).await,
            Err(AgentError::NotRunning)
        ));
    }
}
