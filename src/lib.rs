// src/lib.rs
//! Subnet Agent Runtime
//!
//! Core of a marketplace agent: it subscribes to a matcher's task stream,
//! prices and submits bids, executes won tasks under concurrency and
//! deadline bounds, and reports signed results to validators.
//!
//! # Architecture
//!
//! - **model**: tasks, bids, assignments, reports and batch shapes
//! - **signing**: deterministic secp256k1 request signing
//! - **bidding**: pricing strategies and the active-bid book
//! - **client**: matcher/validator clients, gRPC transports, registry
//! - **runtime**: executor, metrics, handlers and the agent state machine
//! - **observability**: tracing and Prometheus setup
//! - **utils**: configuration and errors

pub mod bidding;
pub mod client;
pub mod model;
pub mod observability;
pub mod runtime;
pub mod signing;
pub mod utils;

pub use bidding::{BiddingStrategy, PricingStrategy, RebidPolicy};
pub use model::{Bid, ExecutionReport, Task, TaskResult};
pub use runtime::{
    AgentCallbacks, AgentRuntime, HandlerRegistry, MetricsSnapshot, RuntimeState, TaskHandler,
};
pub use signing::SigningContext;
pub use utils::config::{AgentConfig, BiddingConfig};
pub use utils::errors::{AgentError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
