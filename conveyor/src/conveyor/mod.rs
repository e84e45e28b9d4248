//! The orchestrator: assembles the three stage chains, wires their queues
//! and drives the lifecycle.
//!
//! ```text
//!            ┌──────────── errors ────────────┐
//!            │                                ▼
//! entry ─► [worker] ─► [worker] ─► ... ─► [error] ─► ... ─┐
//!                              │                          ▼
//!                              └───────── out ─────► [final-system-handler] ─► [user final]
//! ```
//!
//! Completion cascades through queue closes: closing the entry queue lets
//! the first worker stage drain and exit, whose watcher closes the next
//! queue, and so on down to the terminal final stage.

mod options;
mod registry;
mod reporter;
mod statistic;

pub use options::{ConveyorOptions, DEFAULT_RESULT_TIMEOUT};
pub use registry::{ResultRegistry, SYSTEM_FINAL_NAME};
pub use reporter::{LogReporter, StatisticReporter};
pub use statistic::ConveyorStatistic;

use crate::Payload;
use crate::handler::{EmptyHandler, HandlerFactory, TestMode};
use crate::item::{Input, Item, Trace};
use crate::queues::{Queue, new_queue};
use crate::stage::{StageInfo, StageKind};
use crate::workbench::{PriorityLookup, WorkBench};
use crate::workers::{Manager, ManagerSettings, ManagerStats, WorkersCounter};
use conveyor_shared::{ConveyorError, ConveyorResult};
use parking_lot::RwLock;
use registry::SystemFinalHandler;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Name of the error stage installed when none is registered.
pub const DEFAULT_ERROR_NAME: &str = "error-empty-handler";
/// Name of the final stage installed when none is registered.
pub const DEFAULT_FINAL_NAME: &str = "final-empty-handler";

/// Workers of the built-in stages.
const BUILTIN_MIN_WORKERS: usize = 1;
const BUILTIN_MAX_WORKERS: usize = 2;

/// Lifecycle of a conveyor.
///
/// ```text
/// Created ──start──► Running ──stop / wait_and_stop──► Stopping ──► Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConveyorState {
    Created,
    Running,
    Stopping,
    Finished,
}

impl fmt::Display for ConveyorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConveyorState::Created => "created",
            ConveyorState::Running => "running",
            ConveyorState::Stopping => "stopping",
            ConveyorState::Finished => "finished",
        };
        f.write_str(s)
    }
}

struct Chains<T: Payload> {
    workers: Vec<Arc<Manager<T>>>,
    errors: Vec<Arc<Manager<T>>>,
    /// The system final stage comes first.
    finals: Vec<Arc<Manager<T>>>,
    user_final: bool,
    names: HashSet<String>,
}

struct Settings {
    default_priority: i64,
    manager: ManagerSettings,
    tracer: Option<(Arc<dyn Trace>, Duration)>,
    reporter: Option<(Arc<dyn StatisticReporter>, Duration)>,
}

/// Queues owned by the conveyor itself, created at start.
struct Endpoints {
    entry: Arc<dyn Queue>,
}

struct ConveyorInner<T: Payload> {
    options: ConveyorOptions,
    cluster_id: String,
    workbench: Arc<WorkBench<T>>,
    registry: Arc<ResultRegistry>,
    next_id: AtomicU64,

    state: RwLock<ConveyorState>,
    chains: RwLock<Chains<T>>,
    settings: RwLock<Settings>,
    endpoints: OnceLock<Endpoints>,

    root: OnceLock<CancellationToken>,
    worker_class: TaskTracker,
    error_class: TaskTracker,
    final_class: TaskTracker,
}

/// Multi-stage concurrent pipeline.
///
/// Cheap to clone; clones share the same pipeline.
pub struct Conveyor<T: Payload> {
    inner: Arc<ConveyorInner<T>>,
}

impl<T: Payload> Clone for Conveyor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> fmt::Debug for Conveyor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conveyor")
            .field("name", &self.inner.options.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Payload> Conveyor<T> {
    pub fn new(options: ConveyorOptions) -> ConveyorResult<Self> {
        Self::build(options, None)
    }

    /// Conveyor whose handlers are started and run through their test
    /// entry points.
    pub fn new_test(options: ConveyorOptions, mode: TestMode) -> ConveyorResult<Self> {
        Self::build(options, Some(mode))
    }

    fn build(options: ConveyorOptions, test_mode: Option<TestMode>) -> ConveyorResult<Self> {
        let options = options.sanitize()?;
        let cluster_id = format!("{}-{}", options.name, chrono::Utc::now().timestamp());
        let workbench = Arc::new(WorkBench::new(options.workbench_capacity()));
        let registry = Arc::new(ResultRegistry::new());

        let manager_settings = ManagerSettings {
            metric_period: options.metric_period,
            scale_down: options.scale_down,
            test_mode,
            ..Default::default()
        };

        let system_final = Manager::new(
            StageInfo::final_stage(SYSTEM_FINAL_NAME, false),
            BUILTIN_MIN_WORKERS,
            BUILTIN_MAX_WORKERS,
            SystemFinalHandler::factory(Arc::clone(&registry)),
            Arc::clone(&workbench),
            manager_settings.clone(),
        )?;

        tracing::debug!(
            name = %options.name,
            branch_length = options.branch_length,
            queue_kind = %options.queue_kind,
            "Conveyor created"
        );

        Ok(Self {
            inner: Arc::new(ConveyorInner {
                cluster_id,
                workbench,
                registry,
                next_id: AtomicU64::new(0),
                state: RwLock::new(ConveyorState::Created),
                chains: RwLock::new(Chains {
                    workers: Vec::new(),
                    errors: Vec::new(),
                    finals: vec![Arc::new(system_final)],
                    user_final: false,
                    names: HashSet::from([SYSTEM_FINAL_NAME.to_string()]),
                }),
                settings: RwLock::new(Settings {
                    default_priority: options.default_priority,
                    manager: manager_settings,
                    tracer: None,
                    reporter: None,
                }),
                endpoints: OnceLock::new(),
                root: OnceLock::new(),
                worker_class: TaskTracker::new(),
                error_class: TaskTracker::new(),
                final_class: TaskTracker::new(),
                options,
            }),
        })
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn cluster_id(&self) -> &str {
        &self.inner.cluster_id
    }

    pub fn options(&self) -> &ConveyorOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConveyorState {
        *self.inner.state.read()
    }

    pub fn workbench(&self) -> &Arc<WorkBench<T>> {
        &self.inner.workbench
    }

    pub fn default_priority(&self) -> i64 {
        self.inner.settings.read().default_priority
    }

    // ------------------------------------------------------------------
    // configuration
    // ------------------------------------------------------------------

    /// Priority of items submitted without one.
    pub fn set_default_priority(&self, priority: i64) {
        self.inner.settings.write().default_priority = priority;
    }

    /// Interval between scaling decisions, for every stage.
    pub fn set_metric_period(&self, period: Duration) -> ConveyorResult<()> {
        self.ensure_created("set_metric_period")?;
        if period.is_zero() {
            return Err(ConveyorError::Config("metric period must be positive".into()));
        }
        self.inner.settings.write().manager.metric_period = period;
        for manager in self.managers() {
            manager.set_metric_period(period);
        }
        Ok(())
    }

    /// Scaling policy, for every stage.
    pub fn set_workers_counter(&self, counter: Arc<dyn WorkersCounter>) -> ConveyorResult<()> {
        self.ensure_created("set_workers_counter")?;
        self.inner.settings.write().manager.counter = Arc::clone(&counter);
        for manager in self.managers() {
            manager.set_workers_counter(Arc::clone(&counter));
        }
        Ok(())
    }

    /// Conveyor-level trace sink, flushed every `period` and at shutdown.
    pub fn set_tracer(&self, tracer: Arc<dyn Trace>, period: Duration) -> ConveyorResult<()> {
        self.ensure_created("set_tracer")?;
        self.inner.settings.write().tracer = Some((tracer, period));
        Ok(())
    }

    /// Statistic reporter, fed at start, every `period` and after
    /// `wait_and_stop`.
    pub fn set_reporter(
        &self,
        reporter: Arc<dyn StatisticReporter>,
        period: Duration,
    ) -> ConveyorResult<()> {
        self.ensure_created("set_reporter")?;
        self.inner.settings.write().reporter = Some((reporter, period));
        Ok(())
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    /// Append a worker stage. Stages run in registration order.
    pub fn add_handler(
        &self,
        name: impl Into<String>,
        min: usize,
        max: usize,
        factory: HandlerFactory<T>,
    ) -> ConveyorResult<()> {
        self.register(StageKind::Worker, name.into(), min, max, factory)
    }

    /// Append an error stage.
    pub fn add_error_handler(
        &self,
        name: impl Into<String>,
        min: usize,
        max: usize,
        factory: HandlerFactory<T>,
    ) -> ConveyorResult<()> {
        self.register(StageKind::Error, name.into(), min, max, factory)
    }

    /// Set the terminal final stage. At most one may be registered; its
    /// errors are logged and do not change routing.
    pub fn add_final_handler(
        &self,
        name: impl Into<String>,
        min: usize,
        max: usize,
        factory: HandlerFactory<T>,
    ) -> ConveyorResult<()> {
        self.register(StageKind::Final, name.into(), min, max, factory)
    }

    fn register(
        &self,
        kind: StageKind,
        name: String,
        min: usize,
        max: usize,
        factory: HandlerFactory<T>,
    ) -> ConveyorResult<()> {
        self.ensure_created("register a stage")?;

        let mut chains = self.inner.chains.write();
        if name.is_empty() {
            return Err(ConveyorError::Config(format!("{kind} stage name must not be empty")));
        }
        if chains.names.contains(&name) {
            return Err(ConveyorError::Config(format!("stage name '{name}' is not unique")));
        }
        if kind == StageKind::Final && chains.user_final {
            return Err(ConveyorError::Config(
                "only one user final stage is allowed".into(),
            ));
        }

        let settings = self.inner.settings.read().manager.clone();
        let manager = Arc::new(Manager::new(
            StageInfo::new(name.clone(), kind, false),
            min,
            max,
            factory,
            Arc::clone(&self.inner.workbench),
            settings,
        )?);

        match kind {
            StageKind::Worker => chains.workers.push(manager),
            StageKind::Error => chains.errors.push(manager),
            StageKind::Final => {
                chains.user_final = true;
                chains.finals.push(manager);
            }
        }
        chains.names.insert(name.clone());

        tracing::debug!(stage = %name, %kind, min, max, "Stage registered");
        Ok(())
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Wire the queues and start every stage: final, then error, then
    /// worker, so consumers exist before producers.
    ///
    /// `cancel` becomes the parent of the conveyor's root token.
    pub async fn start(&self, cancel: &CancellationToken) -> ConveyorResult<()> {
        self.ensure_created("start")?;
        if self.inner.chains.read().workers.is_empty() {
            return Err(ConveyorError::Config("no worker stage registered".into()));
        }

        if self.inner.chains.read().errors.is_empty() {
            self.add_error_handler(
                DEFAULT_ERROR_NAME,
                BUILTIN_MIN_WORKERS,
                BUILTIN_MAX_WORKERS,
                EmptyHandler::factory(),
            )?;
        }
        if !self.inner.chains.read().user_final {
            self.add_final_handler(
                DEFAULT_FINAL_NAME,
                BUILTIN_MIN_WORKERS,
                BUILTIN_MAX_WORKERS,
                EmptyHandler::factory(),
            )?;
        }

        {
            let mut state = self.inner.state.write();
            if *state != ConveyorState::Created {
                return Err(ConveyorError::InvalidState(format!(
                    "cannot start a conveyor in state {state}"
                )));
            }
            *state = ConveyorState::Running;
        }

        let root = self.inner.root.get_or_init(|| cancel.child_token()).clone();
        let entry = self.wire();
        // Only `start` sets it, and only once.
        let _ = self.inner.endpoints.set(Endpoints { entry });

        if let Err(err) = self.start_chains(&root).await {
            tracing::error!(name = %self.name(), error = %err, "Conveyor failed to start");
            self.stop();
            root.cancel();
            *self.inner.state.write() = ConveyorState::Finished;
            return Err(err);
        }

        self.spawn_background(&root);
        self.log_trace(|| format!("conveyor {} is started", self.name()));
        tracing::info!(name = %self.name(), cluster_id = %self.cluster_id(), "Conveyor started");
        Ok(())
    }

    /// Create every queue and attach it to its stages. Returns the entry
    /// queue.
    fn wire(&self) -> Arc<dyn Queue> {
        let kind = self.inner.options.queue_kind;
        let capacity = self.inner.options.branch_length;
        let lookup: Arc<dyn PriorityLookup> = self.inner.workbench.clone();
        let queue = || new_queue(kind, capacity, Arc::clone(&lookup));

        let entry = queue();
        let errors = queue();
        let out = queue();

        let chains = self.inner.chains.read();

        // Worker chain: entry -> ... -> out, failures -> errors.
        link(&chains.workers, Arc::clone(&entry), Some(Arc::clone(&out)), &queue);
        for manager in &chains.workers {
            manager.set_error_queue(Arc::clone(&errors));
        }

        // Error chain: errors -> ... -> out.
        link(&chains.errors, Arc::clone(&errors), Some(Arc::clone(&out)), &queue);

        // Final chain: out -> system final -> ... -> terminal final.
        link(&chains.finals, out, None, &queue);

        entry
    }

    async fn start_chains(&self, root: &CancellationToken) -> ConveyorResult<()> {
        let (finals, errors, workers) = {
            let chains = self.inner.chains.read();
            (
                chains.finals.clone(),
                chains.errors.clone(),
                chains.workers.clone(),
            )
        };

        for manager in &finals {
            manager.start(root, &self.inner.final_class).await?;
        }
        for manager in &errors {
            manager.start(root, &self.inner.error_class).await?;
        }
        for manager in &workers {
            manager.start(root, &self.inner.worker_class).await?;
        }
        Ok(())
    }

    fn spawn_background(&self, root: &CancellationToken) {
        let (tracer, reporter) = {
            let settings = self.inner.settings.read();
            (settings.tracer.clone(), settings.reporter.clone())
        };

        if let Some((tracer, period)) = tracer {
            let root = root.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = root.cancelled() => break,
                        _ = interval.tick() => tracer.flush(),
                    }
                }
            });
        }

        if let Some((reporter, period)) = reporter {
            let root = root.clone();
            let conveyor = self.clone();
            tokio::spawn(async move {
                // The first tick fires immediately: one report at start.
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = root.cancelled() => break,
                        _ = interval.tick() => conveyor.report(reporter.as_ref()).await,
                    }
                }
            });
        }
    }

    /// Forceful stop: every worker stage abandons its current items.
    ///
    /// Error and final stages keep draining; `wait_and_stop` still
    /// completes afterwards.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.write();
            if *state != ConveyorState::Running {
                return;
            }
            *state = ConveyorState::Stopping;
        }

        for manager in self.inner.chains.read().workers.iter() {
            manager.stop();
        }
        self.log_trace(|| format!("conveyor {} is stopped", self.name()));
        tracing::info!(name = %self.name(), "Conveyor stopped");
    }

    /// Graceful shutdown: refuse new submissions, let every item already
    /// inside reach a final stage, then wait for all stages to exit.
    pub async fn wait_and_stop(&self) {
        {
            let mut state = self.inner.state.write();
            match *state {
                ConveyorState::Created | ConveyorState::Finished => return,
                ConveyorState::Running | ConveyorState::Stopping => {
                    *state = ConveyorState::Stopping;
                }
            }
        }

        if let Some(endpoints) = self.inner.endpoints.get() {
            endpoints.entry.close();
        }

        for class in [
            &self.inner.worker_class,
            &self.inner.error_class,
            &self.inner.final_class,
        ] {
            class.close();
            class.wait().await;
        }

        self.inner.registry.clear();

        let reporter = self.inner.settings.read().reporter.clone();
        if let Some((reporter, _)) = reporter {
            self.report(reporter.as_ref()).await;
        }

        if let Some(root) = self.inner.root.get() {
            root.cancel();
        }

        self.log_trace(|| format!("conveyor {} is finished", self.name()));
        self.flush_trace();
        *self.inner.state.write() = ConveyorState::Finished;
        tracing::info!(name = %self.name(), "Conveyor finished");
    }

    // ------------------------------------------------------------------
    // submission
    // ------------------------------------------------------------------

    /// Submit an item without waiting for it. Returns its id.
    pub async fn run(&self, input: Input<T>) -> ConveyorResult<u64> {
        let item = self.new_item(input, None)?;
        self.enqueue(&item).await?;
        Ok(item.id())
    }

    /// [`Conveyor::run`] with a per-item test mode.
    pub async fn run_test(&self, input: Input<T>, mode: TestMode) -> ConveyorResult<u64> {
        let item = self.new_item(input, Some(mode))?;
        self.enqueue(&item).await?;
        Ok(item.id())
    }

    /// Submit an item and wait until it reaches the system final stage.
    ///
    /// Resolves to the item itself, whatever its error state. Fails with
    /// `Canceled` when the caller's token fires first and with `Timeout`
    /// after the configured result timeout.
    pub async fn run_res_item(&self, input: Input<T>) -> ConveyorResult<Arc<Item<T>>> {
        let item = self.new_item(input, None)?;
        self.wait_result(item).await
    }

    async fn wait_result(&self, item: Arc<Item<T>>) -> ConveyorResult<Arc<Item<T>>> {
        let id = item.id();
        let registry = &self.inner.registry;
        let rx = registry.register(id);

        if let Err(err) = self.enqueue(&item).await {
            registry.forget(id);
            return Err(err);
        }

        let root = self.root_token()?;
        let timeout = self.inner.options.result_timeout;
        tokio::select! {
            _ = item.cancel_token().cancelled() => {
                registry.forget(id);
                Err(ConveyorError::Canceled("context is canceled in run_res".into()))
            }
            // Queued items are never touched by a pipeline cancel.
            _ = root.cancelled() => {
                registry.forget(id);
                Err(ConveyorError::Canceled("conveyor is shut down".into()))
            }
            delivered = rx => match delivered {
                Ok(()) => Ok(item),
                Err(_) => Err(ConveyorError::Internal("result channel is closed".into())),
            },
            _ = tokio::time::sleep(timeout) => {
                registry.forget(id);
                Err(ConveyorError::Timeout(format!("no result for item {id} after {timeout:?}")))
            }
        }
    }

    fn new_item(&self, input: Input<T>, mode: Option<TestMode>) -> ConveyorResult<Arc<Item<T>>> {
        let state = self.state();
        if state != ConveyorState::Running {
            return Err(ConveyorError::InvalidState(format!(
                "cannot submit to a conveyor in state {state}"
            )));
        }

        let (default_priority, default_mode) = {
            let settings = self.inner.settings.read();
            (settings.default_priority, settings.manager.test_mode.clone())
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let item = Item::from_input(id, input, default_priority).with_test_mode(mode.or(default_mode));
        Ok(Arc::new(item))
    }

    /// Park the item on the workbench and push it into the entry queue.
    /// Gives up when the item or the conveyor gets cancelled meanwhile.
    async fn enqueue(&self, item: &Arc<Item<T>>) -> ConveyorResult<()> {
        let entry = self
            .inner
            .endpoints
            .get()
            .map(|e| Arc::clone(&e.entry))
            .ok_or_else(|| ConveyorError::InvalidState("conveyor is not started".into()))?;
        let root = self.root_token()?;

        item.mark_started();

        let index = tokio::select! {
            index = self.inner.workbench.add(Arc::clone(item)) => index?,
            _ = item.cancel_token().cancelled() => {
                return Err(ConveyorError::Canceled("context is canceled before submission".into()));
            }
            _ = root.cancelled() => {
                return Err(ConveyorError::Canceled("conveyor is shut down".into()));
            }
        };

        let pushed = tokio::select! {
            pushed = entry.push(index) => pushed,
            _ = item.cancel_token().cancelled() => {
                Err(ConveyorError::Canceled("context is canceled before submission".into()))
            }
            _ = root.cancelled() => Err(ConveyorError::Canceled("conveyor is shut down".into())),
        };

        if let Err(err) = pushed {
            self.inner.workbench.clean(index);
            return Err(err);
        }

        tracing::trace!(item_id = item.id(), index, "Item submitted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // telemetry
    // ------------------------------------------------------------------

    /// Snapshot of every stage.
    pub fn statistic(&self) -> ConveyorStatistic {
        let chains = self.inner.chains.read();
        let snapshot = |managers: &[Arc<Manager<T>>]| -> Vec<ManagerStats> {
            managers.iter().map(|m| m.stats()).collect()
        };
        ConveyorStatistic {
            cluster_id: self.inner.cluster_id.clone(),
            node_id: self.inner.options.name.clone(),
            workers: snapshot(&chains.workers),
            errors: snapshot(&chains.errors),
            finals: snapshot(&chains.finals),
        }
    }

    async fn report(&self, reporter: &dyn StatisticReporter) {
        if let Err(err) = reporter.report(&self.statistic()).await {
            tracing::warn!(name = %self.name(), error = %err, "Statistic report failed");
        }
    }

    fn log_trace(&self, line: impl FnOnce() -> String) {
        if let Some((tracer, _)) = &self.inner.settings.read().tracer {
            tracer.record(line());
        }
    }

    fn flush_trace(&self) {
        if let Some((tracer, _)) = &self.inner.settings.read().tracer {
            tracer.flush();
        }
    }

    fn managers(&self) -> Vec<Arc<Manager<T>>> {
        let chains = self.inner.chains.read();
        chains
            .workers
            .iter()
            .chain(&chains.errors)
            .chain(&chains.finals)
            .cloned()
            .collect()
    }

    fn root_token(&self) -> ConveyorResult<CancellationToken> {
        self.inner
            .root
            .get()
            .cloned()
            .ok_or_else(|| ConveyorError::InvalidState("conveyor is not started".into()))
    }

    fn ensure_created(&self, action: &str) -> ConveyorResult<()> {
        let state = self.state();
        if state != ConveyorState::Created {
            return Err(ConveyorError::InvalidState(format!(
                "cannot {action} in state {state}"
            )));
        }
        Ok(())
    }
}

impl<T: Payload + Clone> Conveyor<T> {
    /// Submit an item and wait for its payload.
    ///
    /// An error recorded on the item is returned as `Err`.
    pub async fn run_res(&self, input: Input<T>) -> ConveyorResult<T> {
        let item = self.run_res_item(input).await?;
        into_result(&item)
    }

    /// [`Conveyor::run_res`] with a per-item test mode.
    pub async fn run_res_test(&self, input: Input<T>, mode: TestMode) -> ConveyorResult<T> {
        let item = self.new_item(input, Some(mode))?;
        let item = self.wait_result(item).await?;
        into_result(&item)
    }
}

fn into_result<T: Clone>(item: &Item<T>) -> ConveyorResult<T> {
    match item.error() {
        Some(err) => Err(err),
        None => Ok(item.payload_cloned()),
    }
}

/// Connect a chain: `input` feeds the head, fresh queues join neighbours,
/// the tail forwards to `output` and is marked last.
fn link<T: Payload>(
    chain: &[Arc<Manager<T>>],
    input: Arc<dyn Queue>,
    output: Option<Arc<dyn Queue>>,
    queue: &impl Fn() -> Arc<dyn Queue>,
) {
    let Some((last, _)) = chain.split_last() else {
        return;
    };

    let mut upstream = input;
    for pair in chain.windows(2) {
        pair[0].set_input(Arc::clone(&upstream));
        let between = queue();
        pair[0].set_output(Arc::clone(&between));
        upstream = between;
    }

    last.set_input(upstream);
    if let Some(output) = output {
        last.set_output(output);
    }
    last.set_last(true);
}
