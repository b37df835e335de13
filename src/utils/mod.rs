// src/utils/mod.rs
//! Configuration and error types

pub mod config;
pub mod errors;

pub use self::config::{AgentConfig, AgentConfigBuilder, BiddingConfig};
pub use errors::{AgentError, ConfigError, Result};
