// src/main.rs
//! Subnet agent
//!
//! Runs an agent that echoes task payloads back for every configured
//! capability. Configuration comes from `config/agent.*` and
//! `SUBNET_AGENT_*` environment variables.

use anyhow::Result;
use std::sync::Arc;
use subnet_agent::model::{Task, TaskResult};
use subnet_agent::observability::{init_metrics, init_tracing};
use subnet_agent::{AgentConfig, AgentRuntime, HandlerRegistry};
use tracing::{error, info};

async fn echo(task: Task) -> Result<TaskResult> {
    Ok(TaskResult::success(task.payload).with_metadata("handler", "echo"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("SUBNET_AGENT_LOG_JSON").is_ok();
    init_tracing(json_logs);
    let _metrics = init_metrics()?;

    info!("Starting subnet agent v{}", subnet_agent::VERSION);

    let config = AgentConfig::load()?;
    info!(
        "Agent {} on subnet {} with capabilities {:?}",
        config.agent_id(),
        config.subnet_id(),
        config.capabilities
    );

    let handlers = config
        .capabilities
        .iter()
        .fold(HandlerRegistry::new(), |registry, capability| {
            registry.register(capability.clone(), Arc::new(echo))
        });
    let runtime = AgentRuntime::new(config, Arc::new(handlers));

    runtime.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping agent...");

    if let Err(e) = runtime.stop().await {
        error!("Shutdown error: {}", e);
        return Err(e.into());
    }

    if let Some(e) = runtime.last_error() {
        error!("Agent had aborted earlier: {}", e);
    }

    let stats = runtime.stats();
    info!(
        "Final stats: {} completed, {} failed, {} bids, {} won",
        stats.tasks_completed, stats.tasks_failed, stats.bids_submitted, stats.bids_won
    );
    Ok(())
}
