// src/runtime/metrics.rs
//! Runtime counters
//!
//! Atomics are the source of truth for [`MetricsRegistry::snapshot`]; every
//! update is mirrored through the `metrics` facade for whatever recorder the
//! process installed (Prometheus in the binary). Counters only ever grow.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const TASKS_COMPLETED: &str = "subnet_agent_tasks_completed_total";
const TASKS_FAILED: &str = "subnet_agent_tasks_failed_total";
const BIDS_SUBMITTED: &str = "subnet_agent_bids_submitted_total";
const BIDS_REJECTED: &str = "subnet_agent_bids_rejected_total";
const BIDS_WON: &str = "subnet_agent_bids_won_total";
const REPORTS_SUBMITTED: &str = "subnet_agent_reports_submitted_total";
const REPORTS_FAILED: &str = "subnet_agent_reports_failed_total";
const TASKS_IN_FLIGHT: &str = "subnet_agent_tasks_in_flight";
const TASK_DURATION: &str = "subnet_agent_task_duration_seconds";

/// Point-in-time copy of the runtime counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub bids_submitted: u64,
    pub bids_rejected: u64,
    pub bids_won: u64,
    pub reports_submitted: u64,
    pub reports_failed: u64,
    pub tasks_in_flight: u64,

    /// Cumulative handler wall time, microseconds
    pub execution_time_us: u64,
}

impl MetricsSnapshot {
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Mean handler wall time over finished tasks
    pub fn average_execution_time(&self) -> Option<Duration> {
        let finished = self.tasks_finished();
        if finished == 0 {
            return None;
        }
        Some(Duration::from_micros(self.execution_time_us / finished))
    }
}

/// Counters shared by the executor, bidding loop and report submission
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    bids_submitted: AtomicU64,
    bids_rejected: AtomicU64,
    bids_won: AtomicU64,
    reports_submitted: AtomicU64,
    reports_failed: AtomicU64,
    tasks_in_flight: AtomicU64,
    execution_time_us: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal transition of one task; call exactly once per task
    pub fn record_task(&self, success: bool, elapsed: Duration) {
        if success {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(TASKS_COMPLETED).increment(1);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(TASKS_FAILED).increment(1);
        }

        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.execution_time_us.fetch_add(micros, Ordering::Relaxed);
        metrics::histogram!(TASK_DURATION).record(elapsed.as_secs_f64());
    }

    pub fn record_bid_submitted(&self) {
        self.bids_submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(BIDS_SUBMITTED).increment(1);
    }

    pub fn record_bid_rejected(&self) {
        self.bids_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(BIDS_REJECTED).increment(1);
    }

    /// One bid batch: `submitted` acknowledged bids, `rejected` of them refused
    pub fn record_bid_batch(&self, submitted: u64, rejected: u64) {
        self.bids_submitted.fetch_add(submitted, Ordering::Relaxed);
        self.bids_rejected.fetch_add(rejected, Ordering::Relaxed);
        metrics::counter!(BIDS_SUBMITTED).increment(submitted);
        metrics::counter!(BIDS_REJECTED).increment(rejected);
    }

    pub fn record_bid_won(&self) {
        self.bids_won.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(BIDS_WON).increment(1);
    }

    pub fn record_report(&self, accepted: bool) {
        if accepted {
            self.reports_submitted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(REPORTS_SUBMITTED).increment(1);
        } else {
            self.reports_failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(REPORTS_FAILED).increment(1);
        }
    }

    /// One report batch, or a batch that failed as a whole (all `failed`)
    pub fn record_report_batch(&self, accepted: u64, failed: u64) {
        self.reports_submitted.fetch_add(accepted, Ordering::Relaxed);
        self.reports_failed.fetch_add(failed, Ordering::Relaxed);
        metrics::counter!(REPORTS_SUBMITTED).increment(accepted);
        metrics::counter!(REPORTS_FAILED).increment(failed);
    }

    pub(crate) fn task_started(&self) {
        let now = self.tasks_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!(TASKS_IN_FLIGHT).set(now as f64);
    }

    pub(crate) fn task_finished(&self) {
        let now = self
            .tasks_in_flight
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::gauge!(TASKS_IN_FLIGHT).set(now as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            bids_submitted: self.bids_submitted.load(Ordering::Relaxed),
            bids_rejected: self.bids_rejected.load(Ordering::Relaxed),
            bids_won: self.bids_won.load(Ordering::Relaxed),
            reports_submitted: self.reports_submitted.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            tasks_in_flight: self.tasks_in_flight.load(Ordering::Relaxed),
            execution_time_us: self.execution_time_us.load(Ordering::Relaxed),
        }
    }

    /// `(completed, failed, total_bids, won_bids)`
    pub fn get_stats(&self) -> (u64, u64, u64, u64) {
        let snapshot = self.snapshot();
        (
            snapshot.tasks_completed,
            snapshot.tasks_failed,
            snapshot.bids_submitted,
            snapshot.bids_won,
        )
    }
}
