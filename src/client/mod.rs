// src/client/mod.rs
//! Remote clients for the matcher, validators and the agent registry
//!
//! ```text
//! ┌──────────────────┐   sign   ┌──────────────────┐   wire   ┌─────────┐
//! │  MatcherClient   │ ───────► │ MatcherTransport │ ───────► │ matcher │
//! │  ValidatorClient │          │ (tonic / fakes)  │          │validator│
//! └──────────────────┘          └──────────────────┘          └─────────┘
//!   timeouts, batch fallback,
//!   stream reconnects
//! ```
//!
//! - **MatcherClient**: bids, bid cancellation, bid batches, task responses, task stream
//! - **ValidatorClient**: execution reports and report batches
//! - **RegistryClient**: HTTP registration, heartbeat and validator discovery

pub mod batch;
pub mod grpc;
pub mod matcher;
pub mod proto;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod validator;

#[cfg(test)]
pub(crate) mod fakes;

pub use batch::{reconcile, run_batch};
pub use grpc::{GrpcMatcherTransport, GrpcValidatorTransport};
pub use matcher::MatcherClient;
pub use registry::{AgentRegistration, RegistryClient, ValidatorInfo};
pub use stream::TaskStream;
pub use transport::{EventStream, MatcherTransport, ValidatorTransport};
pub use validator::ValidatorClient;
