// src/utils/errors.rs
//! Error taxonomy for the agent runtime
//!
//! Only `Config` errors during `start()` and unrecoverable `Stream` errors
//! stop a running agent. Everything else is scoped to a single task, bid
//! or report.

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, AgentError>;

/// Every problem found while validating a configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigError {
    /// Required fields that were absent or empty
    pub missing: Vec<&'static str>,

    /// Fields that were present but unusable
    pub invalid: Vec<String>,
}

impl ConfigError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }

    pub fn missing(field: &'static str) -> Self {
        Self {
            missing: vec![field],
            invalid: vec![],
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            missing: vec![],
            invalid: vec![message.into()],
        }
    }

    /// Whether `field` was reported as missing
    pub fn is_missing(&self, field: &str) -> bool {
        self.missing.iter().any(|m| *m == field)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing required fields: {}", self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            parts.push(self.invalid.join("; "));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ConfigError {}

/// Agent runtime errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by remote: {reason}")]
    Rejected { reason: String },

    #[error("Task stream failed: {0}")]
    Stream(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid runtime state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Agent runtime is not running")]
    NotRunning,

    #[error("Remote does not implement {0}")]
    Unimplemented(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        AgentError::Rejected {
            reason: reason.into(),
        }
    }

    /// Connectivity failures; only the task stream retries these
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::Stream(_))
    }
}

impl From<tonic::Status> for AgentError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;

        match status.code() {
            Code::InvalidArgument
            | Code::FailedPrecondition
            | Code::PermissionDenied
            | Code::Unauthenticated
            | Code::AlreadyExists
            | Code::NotFound
            | Code::OutOfRange => AgentError::rejected(status.message()),
            Code::Unimplemented => AgentError::Unimplemented(status.message().to_string()),
            code => AgentError::Transport(format!("{:?}: {}", code, status.message())),
        }
    }
}

impl From<tonic::transport::Error> for AgentError {
    fn from(err: tonic::transport::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::Config(ConfigError::invalid(err.to_string()))
    }
}
