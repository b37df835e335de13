// src/runtime/agent_runtime.rs
//! Agent runtime: stream consumption, bidding, execution and reporting
//!
//! One consumer task reads the matcher stream, bids on offers and queues
//! won assignments; a dispatcher feeds the queue into the executor, and each
//! finished task is reported to the validator. The queue holds at most
//! `max_concurrent_tasks` items, so the consumer suspends when it is full.
//!
//! Won assignments are confirmed with `RespondToTask` before they are
//! queued. Every execution runs on the run's [`TaskTracker`], so `stop`
//! waits for reports as well as handlers.

use crate::bidding::{BidBook, BiddingStrategy, PricingStrategy, RebidPolicy};
use crate::client::{
    AgentRegistration, GrpcMatcherTransport, GrpcValidatorTransport, MatcherClient,
    MatcherTransport, RegistryClient, TaskStream, ValidatorClient, ValidatorTransport,
};
use crate::model::task::BID_ID_METADATA_KEY;
use crate::model::{
    Assignment, Bid, ExecutionReport, MatcherEvent, Task, TaskResponse, TaskResult,
    TaskStreamRequest,
};
use crate::runtime::callbacks::{AgentCallbacks, NoCallbacks};
use crate::runtime::executor::{Slot, TaskExecutor};
use crate::runtime::handler::TaskHandler;
use crate::runtime::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::runtime::state::{RuntimeState, StateCell};
use crate::signing::SigningContext;
use crate::utils::config::AgentConfig;
use crate::utils::errors::{AgentError, Result};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Metadata key for the agent's on-chain address
pub const CHAIN_ADDRESS_METADATA_KEY: &str = "chain_address";

/// A won task waiting for an executor slot
struct WorkItem {
    task: Task,
    assignment: Option<Assignment>,
}

/// Everything one run of the runtime needs, shared by its background tasks
struct RunContext {
    agent_id: String,
    currency: String,
    chain_address: Option<String>,
    capabilities: HashSet<String>,
    rebid_policy: RebidPolicy,
    strategy: Arc<dyn BiddingStrategy>,
    executor: TaskExecutor,
    matcher: MatcherClient,
    validator: Option<ValidatorClient>,
    book: BidBook,
    metrics: Arc<MetricsRegistry>,
    callbacks: Arc<dyn AgentCallbacks>,

    /// Executions and their reports
    tracker: TaskTracker,

    /// Items sitting in the work queue
    queued: AtomicUsize,
}

impl RunContext {
    /// Tasks executing or waiting to
    fn load(&self) -> usize {
        self.executor.running() + self.queued.load(Ordering::Relaxed)
    }

    async fn handle_event(
        &self,
        event: MatcherEvent,
        queue: &mpsc::Sender<WorkItem>,
        shutdown: &CancellationToken,
    ) {
        match event {
            MatcherEvent::Offer(task) => self.consider_offer(task).await,
            MatcherEvent::Assignment(assignment) => {
                self.accept_assignment(assignment, queue, shutdown).await
            }
            MatcherEvent::BidLost { intent_id, reason } => {
                if let Some(lost) = self.book.take(&intent_id) {
                    debug!("Bid {} on intent {} lost: {}", lost.bid.bid_id, intent_id, reason);
                    self.callbacks.on_bid_lost(&intent_id, &reason).await;
                }
            }
        }

        let pruned = self.book.prune_expired(Utc::now());
        if pruned > 0 {
            debug!("Pruned {} expired bid(s)", pruned);
        }
    }

    async fn consider_offer(&self, task: Task) {
        if !self.capabilities.contains(&task.task_type) {
            debug!("Skipping task {} of unsupported type {}", task.id, task.task_type);
            return;
        }
        if task.is_expired(Utc::now()) {
            debug!("Skipping task {}: deadline already passed", task.id);
            return;
        }

        let load = self.load();
        let price = match self.strategy.decide(&task, load) {
            Some(price) => price,
            None => {
                debug!("Declined intent {} at load {}", task.intent_id, load);
                return;
            }
        };

        let mut bid = Bid::new(&task.intent_id, &self.agent_id, price, &self.currency);
        if let Some(address) = &self.chain_address {
            bid = bid.with_metadata(CHAIN_ADDRESS_METADATA_KEY, address);
        }

        if self.rebid_policy == RebidPolicy::CancelPrior {
            if let Some(prior) = self.book.get(&task.intent_id) {
                if let Err(e) = self
                    .matcher
                    .cancel_bid(&prior.bid.intent_id, &prior.bid.bid_id)
                    .await
                {
                    warn!("Failed to cancel prior bid {}: {}", prior.bid.bid_id, e);
                }
            }
        }

        match self.matcher.submit_bid(&bid).await {
            Ok(_) => {
                info!("Bid {} on intent {} at {} {}", bid.bid_id, bid.intent_id, price, bid.currency);
                self.callbacks.on_bid_submitted(&bid.intent_id, &bid.bid_id).await;
                self.book.place(task, bid);
            }
            Err(AgentError::Rejected { reason }) => {
                self.callbacks
                    .on_bid_failed(&bid.intent_id, &bid.bid_id, &reason)
                    .await;
            }
            Err(e) => {
                warn!("Failed to submit bid on intent {}: {}", task.intent_id, e);
                self.callbacks
                    .on_bid_failed(&bid.intent_id, &bid.bid_id, &e.to_string())
                    .await;
            }
        }
    }

    async fn accept_assignment(
        &self,
        assignment: Assignment,
        queue: &mpsc::Sender<WorkItem>,
        shutdown: &CancellationToken,
    ) {
        let task = match self
            .book
            .take(&assignment.intent_id)
            .map(|active| active.task)
            .or_else(|| assignment.task.clone())
        {
            Some(task) => task,
            None => {
                warn!(
                    "Assignment {} for unknown intent {}",
                    assignment.assignment_id, assignment.intent_id
                );
                return;
            }
        };

        self.metrics.record_bid_won();
        info!("Won intent {} (assignment {})", assignment.intent_id, assignment.assignment_id);
        self.callbacks.on_bid_won(&assignment.intent_id).await;

        let response = TaskResponse::accept(&task.id, &self.agent_id);
        if let Err(e) = self.matcher.respond_to_task(&response).await {
            warn!("Skipping task {}: could not accept assignment: {}", task.id, e);
            self.callbacks.on_task_rejected(&task, &e.to_string()).await;
            return;
        }
        self.callbacks.on_task_accepted(&task).await;

        let task = if assignment.bid_id.is_empty() {
            task
        } else {
            task.with_metadata(BID_ID_METADATA_KEY, assignment.bid_id.clone())
        };

        self.queued.fetch_add(1, Ordering::Relaxed);
        let item = WorkItem {
            task,
            assignment: Some(assignment),
        };
        tokio::select! {
            sent = queue.send(item) => {
                if sent.is_err() {
                    self.queued.fetch_sub(1, Ordering::Relaxed);
                }
            }
            _ = shutdown.cancelled() => {
                self.queued.fetch_sub(1, Ordering::Relaxed);
                warn!("Dropping won task during shutdown");
            }
        }
    }

    /// Run a task and report it
    async fn process(&self, slot: Slot, task: Task, assignment: Option<Assignment>) -> TaskResult {
        let result = self.executor.run(slot, task.clone()).await;
        self.callbacks.on_task_completed(&task, &result).await;
        self.report(&task, assignment.as_ref(), &result).await;
        result
    }

    async fn report(&self, task: &Task, assignment: Option<&Assignment>, result: &TaskResult) {
        let validator = match &self.validator {
            Some(validator) => validator,
            None => {
                debug!("No validator configured, not reporting task {}", task.id);
                return;
            }
        };

        let mut report = ExecutionReport::for_task(task, assignment, &self.agent_id, result);
        if let Some(address) = &self.chain_address {
            report
                .metadata
                .entry(CHAIN_ADDRESS_METADATA_KEY.to_string())
                .or_insert_with(|| address.clone());
        }

        match validator.submit_execution_report(&report).await {
            Ok(_) => self.callbacks.on_report_submitted(&report.report_id).await,
            Err(e) => {
                warn!("Report {} for task {} not accepted: {}", report.report_id, task.id, e);
                self.callbacks.on_report_failed(&report.report_id, &e).await;
            }
        }
    }
}

/// Background tasks and resources of a started runtime
struct Running {
    ctx: Arc<RunContext>,
    shutdown: CancellationToken,
    consumer: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    registry: Option<(Arc<RegistryClient>, JoinHandle<()>)>,
}

async fn consume(
    ctx: Arc<RunContext>,
    mut stream: TaskStream,
    queue: mpsc::Sender<WorkItem>,
    shutdown: CancellationToken,
    state: Arc<StateCell>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => ctx.handle_event(event, &queue, &shutdown).await,
            Some(Err(e)) => {
                error!("Task stream failed: {}", e);
                abort(&ctx, &state, e).await;
                shutdown.cancel();
                break;
            }
            None => {
                abort(&ctx, &state, AgentError::Stream("task stream ended".to_string())).await;
                shutdown.cancel();
                break;
            }
        }
    }

    stream.close();
    debug!("Stream consumer stopped");
}

async fn abort(ctx: &RunContext, state: &StateCell, e: AgentError) {
    ctx.callbacks.on_error(&e).await;
    state.abort(e);
    ctx.callbacks.on_stop().await;
}

async fn dispatch(ctx: Arc<RunContext>, mut queue: mpsc::Receiver<WorkItem>) {
    while let Some(item) = queue.recv().await {
        let slot = match ctx.executor.reserve().await {
            Ok(slot) => slot,
            Err(_) => break,
        };
        ctx.queued.fetch_sub(1, Ordering::Relaxed);

        let run = Arc::clone(&ctx);
        ctx.tracker.spawn(async move {
            run.process(slot, item.task, item.assignment).await;
        });
    }
    debug!("Dispatcher stopped");
}

/// Builder for [`AgentRuntime`]
pub struct AgentRuntimeBuilder {
    config: AgentConfig,
    handler: Arc<dyn TaskHandler>,
    strategy: Option<Arc<dyn BiddingStrategy>>,
    matcher: Option<Arc<dyn MatcherTransport>>,
    validator: Option<Arc<dyn ValidatorTransport>>,
    metrics: Option<Arc<MetricsRegistry>>,
    callbacks: Option<Arc<dyn AgentCallbacks>>,
}

impl AgentRuntimeBuilder {
    /// Override the configured pricing strategy
    pub fn strategy(mut self, strategy: Arc<dyn BiddingStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Use this matcher transport instead of dialing `matcher_addr`
    pub fn matcher_transport(mut self, transport: Arc<dyn MatcherTransport>) -> Self {
        self.matcher = Some(transport);
        self
    }

    /// Use this validator transport instead of dialing `validator_addr`
    pub fn validator_transport(mut self, transport: Arc<dyn ValidatorTransport>) -> Self {
        self.validator = Some(transport);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Receive lifecycle, bid, task and report events
    pub fn callbacks(mut self, callbacks: Arc<dyn AgentCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn build(self) -> AgentRuntime {
        AgentRuntime {
            config: self.config,
            handler: self.handler,
            strategy: self.strategy,
            matcher_transport: self.matcher,
            validator_transport: self.validator,
            metrics: self.metrics.unwrap_or_default(),
            callbacks: self
                .callbacks
                .unwrap_or_else(|| Arc::new(NoCallbacks) as Arc<dyn AgentCallbacks>),
            state: Arc::new(StateCell::new()),
            lifecycle: Mutex::new(None),
            active: RwLock::new(None),
        }
    }
}

/// Long-running agent: bids on matcher offers and executes won tasks
pub struct AgentRuntime {
    config: AgentConfig,
    handler: Arc<dyn TaskHandler>,
    strategy: Option<Arc<dyn BiddingStrategy>>,
    matcher_transport: Option<Arc<dyn MatcherTransport>>,
    validator_transport: Option<Arc<dyn ValidatorTransport>>,
    metrics: Arc<MetricsRegistry>,
    callbacks: Arc<dyn AgentCallbacks>,
    state: Arc<StateCell>,

    /// Serializes start/stop and owns the background tasks
    lifecycle: Mutex<Option<Running>>,

    /// Context of the current run, for manual execution
    active: RwLock<Option<Arc<RunContext>>>,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, handler: Arc<dyn TaskHandler>) -> Self {
        Self::builder(config, handler).build()
    }

    pub fn builder(config: AgentConfig, handler: Arc<dyn TaskHandler>) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            config,
            handler,
            strategy: None,
            matcher: None,
            validator: None,
            metrics: None,
            callbacks: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        self.state.get()
    }

    /// Error that aborted the last run, if any
    pub fn last_error(&self) -> Option<Arc<AgentError>> {
        self.state.last_error()
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// `(completed, failed, total_bids, won_bids)`
    pub fn get_stats(&self) -> (u64, u64, u64, u64) {
        self.metrics.get_stats()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Validate configuration, subscribe to the matcher and start bidding
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.state
            .transition(RuntimeState::Stopped, RuntimeState::Starting)?;

        match self.launch().await {
            Ok(running) => {
                *lifecycle = Some(running);
                self.state.set(RuntimeState::Running);
                info!(
                    "Agent {} running on subnet {}",
                    self.config.agent_id(),
                    self.config.subnet_id()
                );
                self.callbacks.on_start().await;
                Ok(())
            }
            Err(e) => {
                *self.active.write() = None;
                self.state.set(RuntimeState::Stopped);
                error!("Agent failed to start: {}", e);
                self.callbacks.on_error(&e).await;
                Err(e)
            }
        }
    }

    /// Validate, register, subscribe and spawn the background tasks
    ///
    /// A registry that refuses the registration fails the start. A failure
    /// after registering unregisters again, best effort.
    async fn launch(&self) -> Result<Running> {
        self.config.validate()?;
        let config = &self.config;

        let signer = SigningContext::from_hex(
            config.private_key.as_deref().unwrap_or_default(),
            config.agent_id(),
            config.subnet_id(),
        )?;
        debug!("Signing as {}", signer.public_key_hex());

        let registry = config
            .registry_addr
            .as_deref()
            .map(|addr| Arc::new(RegistryClient::new(addr).with_timeout(config.bid_timeout())));

        if let Some(registry) = &registry {
            let registration = AgentRegistration {
                agent_id: config.agent_id().to_string(),
                subnet_id: config.subnet_id().to_string(),
                capabilities: config.capabilities.clone(),
                endpoint: config.agent_endpoint.clone().unwrap_or_default(),
            };
            registry.register(&registration).await?;
        }

        match self.subscribe(signer, registry.clone()).await {
            Ok(running) => Ok(running),
            Err(e) => {
                if let Some(registry) = &registry {
                    if let Err(unregister) = registry.unregister(config.agent_id()).await {
                        warn!("Registry unregistration failed: {}", unregister);
                    }
                }
                Err(e)
            }
        }
    }

    async fn subscribe(
        &self,
        signer: SigningContext,
        registry: Option<Arc<RegistryClient>>,
    ) -> Result<Running> {
        let config = &self.config;
        let agent_id = config.agent_id().to_string();

        let matcher_transport = match &self.matcher_transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(GrpcMatcherTransport::connect_lazy(
                config.matcher_addr.as_deref().unwrap_or_default(),
            )?) as Arc<dyn MatcherTransport>,
        };
        let matcher = MatcherClient::new(matcher_transport, signer.clone())
            .with_rpc_timeout(config.bid_timeout())
            .with_reconnect_backoff(config.stream_reconnect_backoff())
            .with_metrics(Arc::clone(&self.metrics));

        let validator = self
            .resolve_validator(registry.as_deref())
            .await?
            .map(|transport| {
                ValidatorClient::new(transport, signer.clone())
                    .with_rpc_timeout(config.bid_timeout())
                    .with_metrics(Arc::clone(&self.metrics))
            });

        let strategy = match &self.strategy {
            Some(strategy) => Arc::clone(strategy),
            None => Arc::new(PricingStrategy::from_config(
                &config.bidding,
                config.max_concurrent_tasks,
            )) as Arc<dyn BiddingStrategy>,
        };

        let ctx = Arc::new(RunContext {
            agent_id: agent_id.clone(),
            currency: config.currency.clone(),
            chain_address: config.chain_address.clone(),
            capabilities: config.capabilities.iter().cloned().collect(),
            rebid_policy: config.rebid_policy,
            strategy,
            executor: TaskExecutor::new(
                Arc::clone(&self.handler),
                Arc::clone(&self.metrics),
                config.max_concurrent_tasks,
                config.task_timeout(),
            ),
            matcher,
            validator,
            book: BidBook::new(),
            metrics: Arc::clone(&self.metrics),
            callbacks: Arc::clone(&self.callbacks),
            tracker: TaskTracker::new(),
            queued: AtomicUsize::new(0),
        });
        *self.active.write() = Some(Arc::clone(&ctx));

        let stream = ctx
            .matcher
            .stream_tasks(TaskStreamRequest {
                agent_id: agent_id.clone(),
                subnet_id: config.subnet_id().to_string(),
                capabilities: config.capabilities.clone(),
            })
            .await?;

        let shutdown = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel(config.max_concurrent_tasks.max(1));

        let consumer = tokio::spawn(consume(
            Arc::clone(&ctx),
            stream,
            queue_tx,
            shutdown.clone(),
            Arc::clone(&self.state),
        ));
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&ctx), queue_rx));
        let registry = registry.map(|registry| {
            let heartbeat = Arc::clone(&registry).spawn_heartbeat(
                agent_id,
                config.registry_heartbeat(),
                shutdown.clone(),
            );
            (registry, heartbeat)
        });

        Ok(Running {
            ctx,
            shutdown,
            consumer,
            dispatcher,
            registry,
        })
    }

    /// Injected transport, configured address, or the first validator the
    /// registry advertises
    async fn resolve_validator(
        &self,
        registry: Option<&RegistryClient>,
    ) -> Result<Option<Arc<dyn ValidatorTransport>>> {
        if let Some(transport) = &self.validator_transport {
            return Ok(Some(Arc::clone(transport)));
        }
        if let Some(addr) = self.config.validator_addr.as_deref() {
            return Ok(Some(Arc::new(GrpcValidatorTransport::connect_lazy(addr)?)));
        }

        let registry = match registry {
            Some(registry) => registry,
            None => return Ok(None),
        };
        match registry.discover_validators().await {
            Ok(validators) => match validators.first() {
                Some(validator) => {
                    info!("Using validator {} at {}", validator.validator_id, validator.endpoint);
                    Ok(Some(Arc::new(GrpcValidatorTransport::connect_lazy(
                        &validator.endpoint,
                    )?)))
                }
                None => {
                    warn!("Registry lists no validators; execution reports are disabled");
                    Ok(None)
                }
            },
            Err(e) => {
                warn!("Validator discovery failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Stop consuming the stream, drain in-flight work, and shut down
    ///
    /// Returns once every started task has been executed and reported, or
    /// the shutdown grace has elapsed. A no-op when already stopped.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let running = lifecycle.take();

        if let Err(e) = self
            .state
            .transition(RuntimeState::Running, RuntimeState::Stopping)
        {
            if self.state.get() != RuntimeState::Stopped {
                *lifecycle = running;
                return Err(e);
            }
            if let Some(running) = running {
                // Aborted by a stream failure; release what is left.
                self.shutdown(running).await;
            }
            return Ok(());
        }

        info!("Stopping agent {}", self.config.agent_id());
        if let Some(running) = running {
            self.shutdown(running).await;
        }

        self.state.set(RuntimeState::Stopped);
        let (completed, failed, bids, won) = self.get_stats();
        info!(
            "Agent stopped: {} completed, {} failed, {} bids, {} won",
            completed, failed, bids, won
        );
        self.callbacks.on_stop().await;
        Ok(())
    }

    async fn shutdown(&self, mut running: Running) {
        running.shutdown.cancel();
        let _ = (&mut running.consumer).await;

        let grace = self.config.shutdown_grace();
        let ctx = Arc::clone(&running.ctx);
        let dispatcher = &mut running.dispatcher;
        let drained = tokio::time::timeout(grace, async {
            let _ = dispatcher.await;
            ctx.tracker.close();
            ctx.tracker.wait().await;
            ctx.executor.drain().await;
        })
        .await
        .is_ok();

        if !drained {
            running.dispatcher.abort();
            warn!(
                "Shutdown grace of {:?} elapsed with {} task(s) still running",
                grace,
                running.ctx.tracker.len()
            );
        }
        running.ctx.executor.close();
        running.ctx.book.clear();
        *self.active.write() = None;

        if let Some((registry, heartbeat)) = running.registry {
            let _ = heartbeat.await;
            if let Err(e) = registry.unregister(self.config.agent_id()).await {
                warn!("Registry unregistration failed: {}", e);
            }
        }
    }

    /// Execute a task directly, bypassing bidding
    ///
    /// Follows the same executor, report and metrics path as won tasks.
    /// Allowed in every state except `Stopped`.
    pub async fn execute_task(&self, task: Task) -> Result<TaskResult> {
        if self.state.get() == RuntimeState::Stopped {
            return Err(AgentError::NotRunning);
        }

        let ctx = self.active.read().clone().ok_or(AgentError::NotRunning)?;
        let slot = ctx.executor.reserve().await?;
        Ok(ctx.tracker.track_future(ctx.process(slot, task, None)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidding::PricingStrategy;
    use crate::client::fakes::{Failure, FakeMatcher, FakeValidator, TEST_KEY};
    use crate::runtime::callbacks::recording::RecordingCallbacks;
    use crate::utils::config::BiddingConfig;
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn echo(task: Task) -> anyhow::Result<TaskResult> {
        if task.payload.as_ref() == b"fail" {
            anyhow::bail!("asked to fail");
        }
        Ok(TaskResult::success(task.payload))
    }

    fn config() -> AgentConfig {
        AgentConfig::builder()
            .subnet_id("subnet-2")
            .agent_id("agent-1")
            .private_key(TEST_KEY)
            .matcher_addr("127.0.0.1:50051")
            .capabilities(["compute"])
            .max_concurrent_tasks(2)
            .shutdown_grace(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    struct Harness {
        runtime: AgentRuntime,
        matcher: Arc<FakeMatcher>,
        validator: Arc<FakeValidator>,
        callbacks: Arc<RecordingCallbacks>,
        feed: mpsc::Sender<Result<MatcherEvent>>,
    }

    fn harness(config: AgentConfig) -> Harness {
        let matcher = Arc::new(FakeMatcher::new());
        let validator = Arc::new(FakeValidator::new());
        let callbacks = Arc::new(RecordingCallbacks::default());
        let feed = matcher.push_stream();
        let runtime = AgentRuntime::builder(config, Arc::new(echo))
            .matcher_transport(matcher.clone())
            .validator_transport(validator.clone())
            .callbacks(callbacks.clone())
            .build();

        Harness {
            runtime,
            matcher,
            validator,
            callbacks,
            feed,
        }
    }

    /// Registry that answers every request with a 500
    async fn failing_registry() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let service = service_fn(|_req: Request<Incoming>| async {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::INTERNAL_SERVER_ERROR)
                                .body(Full::new(Bytes::from("registry down")))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr.to_string()
    }

    fn offer(intent: &str, task_type: &str) -> MatcherEvent {
        MatcherEvent::Offer(Task::new(format!("task-{}", intent), intent, task_type, "payload"))
    }

    fn assignment(intent: &str, bid_id: &str) -> MatcherEvent {
        MatcherEvent::Assignment(Assignment {
            assignment_id: format!("asg-{}", intent),
            intent_id: intent.to_string(),
            bid_id: bid_id.to_string(),
            task: None,
        })
    }

    /// Poll until `cond` holds, letting background tasks make progress
    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_missing_matcher_addr_fails_before_network() {
        let mut config = config();
        config.matcher_addr = None;
        let h = harness(config);

        let err = h.runtime.start().await.unwrap_err();
        match err {
            AgentError::Config(e) => assert!(e.is_missing("matcher_addr")),
            other => panic!("expected config error, got {:?}", other),
        }
        assert_eq!(h.matcher.stream_opens(), 0);
        assert_eq!(h.runtime.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_bids_on_offer_and_executes_assignment() {
        let h = harness(config());
        h.runtime.start().await.unwrap();
        assert_eq!(h.runtime.state(), RuntimeState::Running);

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 1).await;

        let bid_id = h.matcher.bids.lock()[0].bid_id.clone();
        assert_eq!(h.matcher.bids.lock()[0].price, 100);
        h.feed.send(Ok(assignment("intent-1", &bid_id))).await.unwrap();
        eventually(|| h.validator.report_count() == 1).await;

        let report = h.validator.reports.lock()[0].clone();
        assert_eq!(report.assignment_id, "asg-intent-1");
        assert_eq!(report.metadata.get("bid_id"), Some(&bid_id));

        let responses = h.matcher.responses.lock().clone();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].task_id, "task-intent-1");
        assert_eq!(responses[0].agent_id, "agent-1");
        assert!(responses[0].accepted);
        assert_eq!(h.runtime.get_stats(), (1, 0, 1, 1));
        assert_eq!(h.runtime.stats().reports_submitted, 1);

        h.runtime.stop().await.unwrap();
        assert_eq!(h.runtime.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_unsupported_task_type_never_bids() {
        let h = harness(config());
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-x", "render"))).await.unwrap();
        h.feed.send(Ok(offer("intent-y", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 1).await;

        assert_eq!(h.matcher.bids.lock()[0].intent_id, "intent-y");
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_declined_offer_submits_nothing() {
        let matcher = Arc::new(FakeMatcher::new());
        let feed = matcher.push_stream();
        let runtime = AgentRuntime::builder(config(), Arc::new(echo))
            .matcher_transport(matcher.clone())
            .strategy(Arc::new(PricingStrategy::dynamic(50, 500, 0)))
            .build();
        runtime.start().await.unwrap();

        feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        feed.send(Ok(MatcherEvent::BidLost {
            intent_id: "intent-1".into(),
            reason: "closed".into(),
        }))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(matcher.bid_count(), 0);
        assert_eq!(runtime.get_stats().2, 0);
        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_bid_is_counted() {
        let h = harness(config());
        h.matcher.fail_all_bids(Failure::Reject("over budget".into()));
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.runtime.stats().bids_rejected == 1).await;

        assert_eq!(h.runtime.get_stats().2, 1);
        assert_eq!(h.runtime.get_stats().3, 0);
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_prior_rebid() {
        let mut config = config();
        config.rebid_policy = RebidPolicy::CancelPrior;
        let h = harness(config);
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 1).await;
        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 2).await;

        let first = h.matcher.bids.lock()[0].bid_id.clone();
        let cancelled = h.matcher.cancelled.lock().clone();
        assert_eq!(cancelled, vec![("intent-1".to_string(), first)]);
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_task_requires_started_runtime() {
        let h = harness(config());
        let result = h.runtime.execute_task(Task::new("t", "i", "compute", "x")).await;
        assert!(matches!(result, Err(AgentError::NotRunning)));
    }

    #[tokio::test]
    async fn test_execute_task_reports_and_counts() {
        let mut config = config();
        config.chain_address = Some("0xabc".into());
        let h = harness(config);
        h.runtime.start().await.unwrap();

        let ok = h
            .runtime
            .execute_task(Task::new("t1", "i1", "compute", "hello"))
            .await
            .unwrap();
        let failed = h
            .runtime
            .execute_task(Task::new("t2", "i2", "compute", "fail"))
            .await
            .unwrap();

        assert!(ok.success);
        assert_eq!(ok.output.as_ref(), b"hello");
        assert_eq!(failed.error.as_deref(), Some("asked to fail"));
        assert_eq!(h.runtime.get_stats(), (1, 1, 0, 0));

        let reports = h.validator.reports.lock().clone();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].assignment_id, "t1");
        assert_eq!(
            reports[0].metadata.get(CHAIN_ADDRESS_METADATA_KEY).map(String::as_str),
            Some("0xabc")
        );
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_report_does_not_fail_task() {
        let h = harness(config());
        h.validator.fail_all(Failure::Nack("stale".into()));
        h.runtime.start().await.unwrap();

        let result = h
            .runtime
            .execute_task(Task::new("t1", "i1", "compute", "x"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(h.runtime.stats().reports_failed, 1);
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_failure_aborts_runtime() {
        let mut config = config();
        config.stream_reconnect_backoff_ms = 1;
        let h = harness(config);
        h.runtime.start().await.unwrap();

        h.feed
            .send(Err(AgentError::Transport("reset".into())))
            .await
            .unwrap();
        eventually(|| h.runtime.state() == RuntimeState::Stopped).await;

        assert!(matches!(
            h.runtime.last_error().as_deref(),
            Some(AgentError::Stream(_))
        ));
        h.runtime.stop().await.unwrap();
        assert!(h.runtime.last_error().is_some());

        let events = h.callbacks.events();
        assert!(events.iter().any(|e| e.starts_with("error:")));
        assert_eq!(events.iter().filter(|e| *e == "stop").count(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice() {
        let h = harness(config());
        h.runtime.start().await.unwrap();
        assert!(matches!(
            h.runtime.start().await,
            Err(AgentError::InvalidState { .. })
        ));

        h.runtime.stop().await.unwrap();
        h.runtime.stop().await.unwrap();
        assert_eq!(h.runtime.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_tasks() {
        let matcher = Arc::new(FakeMatcher::new());
        let _feed = matcher.push_stream();
        let runtime = Arc::new(
            AgentRuntime::builder(
                config(),
                Arc::new(|task: Task| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, anyhow::Error>(TaskResult::success(task.id))
                }),
            )
            .matcher_transport(matcher)
            .build(),
        );
        runtime.start().await.unwrap();

        let background = Arc::clone(&runtime);
        let running = tokio::spawn(async move {
            background
                .execute_task(Task::new("slow", "i", "compute", ""))
                .await
        });
        eventually(|| runtime.stats().tasks_in_flight == 1).await;

        runtime.stop().await.unwrap();
        assert_eq!(runtime.get_stats().0, 1);
        assert!(running.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_dynamic_strategy_from_config() {
        let mut config = config();
        config.bidding = BiddingConfig::Dynamic {
            min_price: 50,
            max_price: 500,
            decline_at_capacity: true,
        };
        let h = harness(config);
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 1).await;

        assert_eq!(h.matcher.bids.lock()[0].price, 50);
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_slow_report() {
        let h = harness(config());
        h.validator.delay_reports(Duration::from_millis(200));
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 1).await;
        let bid_id = h.matcher.bids.lock()[0].bid_id.clone();
        h.feed.send(Ok(assignment("intent-1", &bid_id))).await.unwrap();

        // Handler done, report still with the validator
        eventually(|| h.runtime.get_stats().0 == 1).await;
        assert_eq!(h.validator.report_count(), 0);

        h.runtime.stop().await.unwrap();
        assert_eq!(h.runtime.state(), RuntimeState::Stopped);
        assert_eq!(h.validator.report_count(), 1);
        assert_eq!(h.runtime.stats().reports_submitted, 1);
    }

    #[tokio::test]
    async fn test_registration_failure_fails_start() {
        let mut config = config();
        config.registry_addr = Some(failing_registry().await);
        config.agent_endpoint = Some("127.0.0.1:9000".into());
        let h = harness(config);

        let err = h.runtime.start().await.unwrap_err();
        assert!(matches!(err, AgentError::Registry(_)));
        assert_eq!(h.runtime.state(), RuntimeState::Stopped);
        assert_eq!(h.matcher.stream_opens(), 0);
        assert!(h.callbacks.events().iter().any(|e| e.starts_with("error:")));
        assert!(!h.callbacks.contains("start"));
    }

    #[tokio::test]
    async fn test_unconfirmed_assignment_is_not_executed() {
        let h = harness(config());
        h.matcher
            .fail_task_responses(Failure::Transport("matcher unreachable".into()));
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 1).await;
        let bid_id = h.matcher.bids.lock()[0].bid_id.clone();
        h.feed.send(Ok(assignment("intent-1", &bid_id))).await.unwrap();
        eventually(|| h.callbacks.contains("rejected:task-intent-1")).await;

        h.runtime.stop().await.unwrap();
        assert_eq!(h.runtime.get_stats(), (0, 0, 1, 1));
        assert_eq!(h.validator.report_count(), 0);
        assert!(!h.callbacks.contains("accepted:task-intent-1"));
    }

    #[tokio::test]
    async fn test_callbacks_follow_task_lifecycle() {
        let h = harness(config());
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        h.feed.send(Ok(offer("intent-2", "compute"))).await.unwrap();
        eventually(|| h.matcher.bid_count() == 2).await;

        let bid_id = h.matcher.bids.lock()[0].bid_id.clone();
        h.feed.send(Ok(assignment("intent-1", &bid_id))).await.unwrap();
        h.feed
            .send(Ok(MatcherEvent::BidLost {
                intent_id: "intent-2".into(),
                reason: "outbid".into(),
            }))
            .await
            .unwrap();
        eventually(|| h.callbacks.events().iter().any(|e| e.starts_with("report:"))).await;
        eventually(|| h.callbacks.contains("lost:intent-2")).await;
        h.runtime.stop().await.unwrap();

        let events = h.callbacks.events();
        let position = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert_eq!(events.first().map(String::as_str), Some("start"));
        assert_eq!(events.last().map(String::as_str), Some("stop"));
        assert!(position("bid:intent-1") < position("won:intent-1"));
        assert!(position("won:intent-1") < position("accepted:task-intent-1"));
        assert!(position("accepted:task-intent-1") < position("completed:task-intent-1:true"));
    }

    #[tokio::test]
    async fn test_rejected_bid_fires_bid_failed() {
        let h = harness(config());
        h.matcher.fail_all_bids(Failure::Nack("price too high".into()));
        h.runtime.start().await.unwrap();

        h.feed.send(Ok(offer("intent-1", "compute"))).await.unwrap();
        eventually(|| h.callbacks.contains("bid_failed:intent-1")).await;

        assert_eq!(h.runtime.stats().bids_rejected, 1);
        assert!(!h.callbacks.contains("bid:intent-1"));
        h.runtime.stop().await.unwrap();
    }
}
