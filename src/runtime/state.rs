// src/runtime/state.rs
//! Runtime lifecycle state
//!
//! ```text
//! Stopped ──start()──► Starting ──► Running ──stop()──► Stopping ──► Stopped
//!    ▲                    │            │
//!    └──── start failed ──┘            └── stream failure (error kept)
//! ```

use crate::utils::errors::{AgentError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Stopped => "stopped",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Inner {
    state: RuntimeState,
    last_error: Option<Arc<AgentError>>,
}

/// Current state plus the error that last aborted the runtime
///
/// Shared between the runtime handle and its background tasks.
#[derive(Default)]
pub struct StateCell {
    inner: Mutex<Inner>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> RuntimeState {
        self.inner.lock().state
    }

    pub fn last_error(&self) -> Option<Arc<AgentError>> {
        self.inner.lock().last_error.clone()
    }

    /// Move `from -> to`, failing if the current state is not `from`
    pub fn transition(&self, from: RuntimeState, to: RuntimeState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return Err(AgentError::InvalidState {
                expected: from.as_str(),
                actual: inner.state.as_str(),
            });
        }

        debug!("Runtime state {} -> {}", from, to);
        inner.state = to;
        if to == RuntimeState::Starting {
            inner.last_error = None;
        }
        Ok(())
    }

    pub fn set(&self, to: RuntimeState) {
        let mut inner = self.inner.lock();
        debug!("Runtime state {} -> {}", inner.state, to);
        inner.state = to;
    }

    /// Record a fatal error and stop, unless a shutdown is already under way
    ///
    /// Returns whether the runtime was aborted.
    pub fn abort(&self, err: AgentError) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RuntimeState::Running {
            return false;
        }

        error!("Runtime aborted: {}", err);
        inner.state = RuntimeState::Stopped;
        inner.last_error = Some(Arc::new(err));
        true
    }
}
