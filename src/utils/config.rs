// src/utils/config.rs
//! Agent configuration
//!
//! Loaded from an optional `config/agent.{toml,yaml,json}` file and
//! `SUBNET_AGENT_*` environment variables, or built in code with
//! [`AgentConfigBuilder`]. Identity, key, matcher address and capabilities
//! have no defaults; validation reports every missing field at once.

use crate::bidding::RebidPolicy;
use crate::signing::PRIVATE_KEY_HEX_LEN;
use crate::utils::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pricing strategy selection and its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum BiddingConfig {
    Fixed {
        price: u64,
    },
    Dynamic {
        min_price: u64,
        max_price: u64,
        #[serde(default = "default_true")]
        decline_at_capacity: bool,
    },
}

fn default_true() -> bool {
    true
}

impl Default for BiddingConfig {
    fn default() -> Self {
        BiddingConfig::Fixed { price: 100 }
    }
}

/// Agent runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Subnet this agent serves (required)
    pub subnet_id: Option<String>,

    /// Agent identity (required)
    pub agent_id: Option<String>,

    /// Hex-encoded secp256k1 key, 64 characters, no prefix (required)
    pub private_key: Option<String>,

    /// Matcher gRPC address (required)
    pub matcher_addr: Option<String>,

    /// Validator gRPC address; reports are not submitted without it
    pub validator_addr: Option<String>,

    /// Registry HTTP address
    pub registry_addr: Option<String>,

    /// Endpoint advertised to the registry
    pub agent_endpoint: Option<String>,

    /// On-chain address added to bid and report metadata
    pub chain_address: Option<String>,

    /// Task types this agent handles (required, non-empty)
    pub capabilities: Vec<String>,

    /// Upper bound on a single handler invocation
    pub task_timeout_secs: u64,

    /// Timeout for unary and batch RPCs
    pub bid_timeout_secs: u64,

    /// Concurrent handler invocations
    pub max_concurrent_tasks: usize,

    /// How long `stop()` waits for in-flight tasks
    pub shutdown_grace_secs: u64,

    /// Registry heartbeat interval
    pub registry_heartbeat_secs: u64,

    /// Delay before the task stream's reconnect attempt
    pub stream_reconnect_backoff_ms: u64,

    /// Currency tag put on bids
    pub currency: String,

    pub bidding: BiddingConfig,

    pub rebid_policy: RebidPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            subnet_id: None,
            agent_id: None,
            private_key: None,
            matcher_addr: None,
            validator_addr: None,
            registry_addr: None,
            agent_endpoint: None,
            chain_address: None,
            capabilities: vec![],
            task_timeout_secs: 30,
            bid_timeout_secs: 5,
            max_concurrent_tasks: 5,
            shutdown_grace_secs: 10,
            registry_heartbeat_secs: 30,
            stream_reconnect_backoff_ms: 5_000,
            currency: "PIN".to_string(),
            bidding: BiddingConfig::default(),
            rebid_policy: RebidPolicy::default(),
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl AgentConfig {
    /// Load from `config/agent` (optional) and `SUBNET_AGENT_*` env vars
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/agent").required(false))
            .add_source(
                config::Environment::with_prefix("SUBNET_AGENT")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("capabilities")
                    .try_parsing(true),
            )
            .build()?;

        let config: AgentConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single configuration file; the format follows the extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: AgentConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
    }

    /// Check every field, collecting all problems
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut errors = ConfigError::default();

        if !present(&self.subnet_id) {
            errors.missing.push("subnet_id");
        }
        if !present(&self.agent_id) {
            errors.missing.push("agent_id");
        }
        if !present(&self.private_key) {
            errors.missing.push("private_key");
        }
        if !present(&self.matcher_addr) {
            errors.missing.push("matcher_addr");
        }
        if self.capabilities.iter().all(|c| c.trim().is_empty()) {
            errors.missing.push("capabilities");
        }

        if let Some(key) = self.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let key = key.trim();
            if key.len() != PRIVATE_KEY_HEX_LEN || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                errors.invalid.push(format!(
                    "private_key must be {} hex characters without prefix",
                    PRIVATE_KEY_HEX_LEN
                ));
            }
        }
        if self.max_concurrent_tasks == 0 {
            errors.invalid.push("max_concurrent_tasks must be positive".to_string());
        }
        if self.task_timeout_secs == 0 {
            errors.invalid.push("task_timeout_secs must be positive".to_string());
        }
        if let BiddingConfig::Dynamic {
            min_price,
            max_price,
            ..
        } = self.bidding
        {
            if min_price > max_price {
                errors.invalid.push(format!(
                    "dynamic bidding min_price ({}) exceeds max_price ({})",
                    min_price, max_price
                ));
            }
        }
        if present(&self.registry_addr) && !present(&self.agent_endpoint) {
            errors
                .invalid
                .push("agent_endpoint must be set when registry_addr is set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn supports(&self, task_type: &str) -> bool {
        self.capabilities.iter().any(|c| c == task_type)
    }

    pub fn agent_id(&self) -> &str {
        self.agent_id.as_deref().unwrap_or_default()
    }

    pub fn subnet_id(&self) -> &str {
        self.subnet_id.as_deref().unwrap_or_default()
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn bid_timeout(&self) -> Duration {
        Duration::from_secs(self.bid_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn registry_heartbeat(&self) -> Duration {
        Duration::from_secs(self.registry_heartbeat_secs)
    }

    pub fn stream_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.stream_reconnect_backoff_ms)
    }
}

/// Fluent construction of an [`AgentConfig`], validated on `build()`
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subnet_id(mut self, subnet_id: impl Into<String>) -> Self {
        self.config.subnet_id = Some(subnet_id.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.config.agent_id = Some(agent_id.into());
        self
    }

    pub fn private_key(mut self, private_key: impl Into<String>) -> Self {
        self.config.private_key = Some(private_key.into());
        self
    }

    pub fn matcher_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.matcher_addr = Some(addr.into());
        self
    }

    pub fn validator_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.validator_addr = Some(addr.into());
        self
    }

    pub fn registry_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.registry_addr = Some(addr.into());
        self
    }

    pub fn agent_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.agent_endpoint = Some(endpoint.into());
        self
    }

    pub fn chain_address(mut self, addr: impl Into<String>) -> Self {
        self.config.chain_address = Some(addr.into());
        self
    }

    pub fn capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_capability(mut self, capability: impl Into<String>) -> Self {
        self.config.capabilities.push(capability.into());
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout_secs = timeout.as_secs();
        self
    }

    pub fn bid_timeout(mut self, timeout: Duration) -> Self {
        self.config.bid_timeout_secs = timeout.as_secs();
        self
    }

    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.config.max_concurrent_tasks = max;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_secs = grace.as_secs();
        self
    }

    pub fn registry_heartbeat(mut self, interval: Duration) -> Self {
        self.config.registry_heartbeat_secs = interval.as_secs();
        self
    }

    pub fn stream_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.config.stream_reconnect_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.config.currency = currency.into();
        self
    }

    pub fn bidding(mut self, bidding: BiddingConfig) -> Self {
        self.config.bidding = bidding;
        self
    }

    pub fn rebid_policy(mut self, policy: RebidPolicy) -> Self {
        self.config.rebid_policy = policy;
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// The configuration as set, without validation
    pub fn build_unchecked(self) -> AgentConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::AgentError;
    use std::io::Write;

    const KEY: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn complete() -> AgentConfigBuilder {
        AgentConfig::builder()
            .subnet_id("subnet-2")
            .agent_id("agent-1")
            .private_key(KEY)
            .matcher_addr("localhost:8090")
            .capabilities(["compute", "storage"])
    }

    #[test]
    fn test_defaults() {
        let config = complete().build().unwrap();
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.bidding, BiddingConfig::Fixed { price: 100 });
        assert_eq!(config.rebid_policy, RebidPolicy::Supersede);
        assert!(config.supports("compute"));
        assert!(!config.supports("gpu"));
    }

    #[test]
    fn test_reports_every_missing_field() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert_eq!(
            err.missing,
            vec!["subnet_id", "agent_id", "private_key", "matcher_addr", "capabilities"]
        );
    }

    #[test]
    fn test_missing_matcher_only() {
        let mut config = complete().build_unchecked();
        config.matcher_addr = None;
        let err = config.validate().unwrap_err();
        assert_eq!(err.missing, vec!["matcher_addr"]);
        assert!(err.invalid.is_empty());
    }

    #[test]
    fn test_invalid_values() {
        let result = complete()
            .private_key("0xabc")
            .max_concurrent_tasks(0)
            .bidding(BiddingConfig::Dynamic {
                min_price: 500,
                max_price: 50,
                decline_at_capacity: true,
            })
            .registry_addr("localhost:8101")
            .build();

        match result {
            Err(AgentError::Config(err)) => {
                assert!(err.missing.is_empty());
                assert_eq!(err.invalid.len(), 4);
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
subnet_id = "subnet-2"
agent_id = "agent-1"
private_key = "{}"
matcher_addr = "localhost:8090"
capabilities = ["compute"]
max_concurrent_tasks = 10
rebid_policy = "cancel_prior"

[bidding]
strategy = "dynamic"
min_price = 50
max_price = 500
"#,
            KEY
        )
        .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_concurrent_tasks, 10);
        assert_eq!(config.rebid_policy, RebidPolicy::CancelPrior);
        assert_eq!(
            config.bidding,
            BiddingConfig::Dynamic {
                min_price: 50,
                max_price: 500,
                decline_at_capacity: true
            }
        );
        assert_eq!(config.task_timeout_secs, 30);
    }

    #[test]
    fn test_file_missing_required_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "agent_id = \"agent-1\"").unwrap();

        let err = AgentConfig::from_file(file.path()).unwrap_err();
        match err {
            AgentError::Config(err) => {
                assert!(err.is_missing("subnet_id"));
                assert!(err.is_missing("matcher_addr"));
                assert!(!err.is_missing("agent_id"));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
