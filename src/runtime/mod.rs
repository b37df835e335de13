// src/runtime/mod.rs
//! Agent runtime
//!
//! - **AgentRuntime**: lifecycle, stream consumption, bidding and reporting
//! - **AgentCallbacks**: optional hooks for lifecycle, bid, task and report events
//! - **TaskExecutor**: bounded, deadline-enforcing handler execution
//! - **TaskHandler / HandlerRegistry**: user task logic
//! - **MetricsRegistry**: monotonic runtime counters
//! - **RuntimeState**: `Stopped -> Starting -> Running -> Stopping -> Stopped`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ offers  ┌─────────────┐ bids  ┌───────────────┐
//! │ TaskStream   │ ──────► │  consumer   │ ────► │ MatcherClient │
//! └──────────────┘         └─────────────┘       └───────────────┘
//!                                 │ assignments (RespondToTask)
//!                                 ▼
//!                   work queue (max_concurrent_tasks)
//!                                 │
//!                                 ▼
//!                  ┌─────────────────────────────┐
//!                  │ TaskExecutor (N slots)      │
//!                  │   handler ⟷ deadline timer  │
//!                  └─────────────────────────────┘
//!                                 │ results
//!                                 ▼
//!                        ValidatorClient (reports)
//! ```

pub mod agent_runtime;
pub mod callbacks;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod state;

pub use agent_runtime::{AgentRuntime, AgentRuntimeBuilder, CHAIN_ADDRESS_METADATA_KEY};
pub use callbacks::{AgentCallbacks, NoCallbacks};
pub use executor::{Slot, TaskExecutor};
pub use handler::{HandlerRegistry, TaskHandler};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use state::RuntimeState;
