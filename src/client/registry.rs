// src/client/registry.rs
//! Agent registry client (HTTP/JSON)
//!
//! A refused registration fails the agent's start. Heartbeat failures are
//! only logged; the next tick retries.

use crate::utils::errors::{AgentError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registration record sent on `POST /agents`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub subnet_id: String,
    pub capabilities: Vec<String>,
    pub endpoint: String,
}

/// A validator advertised by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub validator_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
}

#[derive(Deserialize)]
struct ValidatorList {
    #[serde(default)]
    validators: Vec<ValidatorInfo>,
}

/// HTTP client for the agent registry
pub struct RegistryClient {
    base_url: String,
    http: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(addr: &str) -> Self {
        let http = Client::builder(TokioExecutor::new()).build_http();

        Self {
            base_url: normalize_base_url(addr),
            http,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, registration: &AgentRegistration) -> Result<()> {
        let body = serde_json::to_vec(registration)?;
        self.send(Method::POST, "/agents", Some(body)).await?;
        info!(
            "Registered agent {} at {} with registry",
            registration.agent_id, registration.endpoint
        );
        Ok(())
    }

    pub async fn heartbeat(&self, agent_id: &str) -> Result<()> {
        self.send(Method::POST, &format!("/agents/{}/heartbeat", agent_id), None)
            .await?;
        debug!("Heartbeat sent for agent {}", agent_id);
        Ok(())
    }

    pub async fn unregister(&self, agent_id: &str) -> Result<()> {
        self.send(Method::DELETE, &format!("/agents/{}", agent_id), None)
            .await?;
        info!("Unregistered agent {}", agent_id);
        Ok(())
    }

    pub async fn discover_validators(&self) -> Result<Vec<ValidatorInfo>> {
        let body = self.send(Method::GET, "/validators", None).await?;
        let list: ValidatorList = serde_json::from_slice(&body)?;
        debug!("Registry lists {} validator(s)", list.validators.len());
        Ok(list.validators)
    }

    /// Heartbeat every `interval` until `shutdown` fires
    pub fn spawn_heartbeat(
        self: Arc<Self>,
        agent_id: String,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.heartbeat(&agent_id).await {
                            warn!("Registry heartbeat failed: {}", e);
                        }
                    }
                }
            }
            debug!("Registry heartbeat stopped for agent {}", agent_id);
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Bytes> {
        let uri: Uri = format!("{}{}", self.base_url, path)
            .parse()
            .map_err(|e| AgentError::Registry(format!("invalid registry URL: {}", e)))?;

        let mut builder = Request::builder().method(method.clone()).uri(uri);
        if body.is_some() {
            builder = builder.header(hyper::header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| AgentError::Registry(format!("request build error: {}", e)))?;

        let response = tokio::time::timeout(self.timeout, self.http.request(request))
            .await
            .map_err(|_| AgentError::Registry(format!("{} {} timed out", method, path)))?
            .map_err(|e| AgentError::Registry(format!("{} {} failed: {}", method, path, e)))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AgentError::Registry(format!("response body error: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(AgentError::Registry(format!(
                "{} {} returned {}: {}",
                method,
                path,
                status,
                String::from_utf8_lossy(&bytes)
            )));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Bytes::new());
        }

        Ok(bytes)
    }
}

fn normalize_base_url(addr: &str) -> String {
    let trimmed = addr.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
