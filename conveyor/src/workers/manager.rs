//! Per-stage controller: owns the worker pool, scales it and closes the
//! downstream queue once every worker is gone.

use super::counter::{DefaultWorkersCounter, ScaleAction, ScaleDownPolicy, WorkersCounter};
use super::stats::{ManagerStats, WorkersStats};
use super::worker::{StageContext, StageCounters, Worker, start_handler};
use crate::Payload;
use crate::handler::{Handler, HandlerFactory, TestMode};
use crate::queues::Queue;
use crate::stage::{StageInfo, StageKind};
use crate::workbench::WorkBench;
use conveyor_shared::{ConveyorError, ConveyorResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Default interval between two scaling decisions.
pub const DEFAULT_METRIC_PERIOD: Duration = Duration::from_secs(10);

/// Settings shared by every manager of a conveyor.
#[derive(Clone)]
pub struct ManagerSettings {
    pub metric_period: Duration,
    pub scale_down: ScaleDownPolicy,
    pub test_mode: Option<TestMode>,
    pub counter: Arc<dyn WorkersCounter>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            metric_period: DEFAULT_METRIC_PERIOD,
            scale_down: ScaleDownPolicy::default(),
            test_mode: None,
            counter: Arc::new(DefaultWorkersCounter),
        }
    }
}

struct WorkerHandle {
    id: String,
    started_at: Instant,
    retire: CancellationToken,
    busy: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Wiring {
    input: Option<Arc<dyn Queue>>,
    output: Option<Arc<dyn Queue>>,
    error: Option<Arc<dyn Queue>>,
}

/// Controller of one stage.
pub struct Manager<T: Payload> {
    info: RwLock<StageInfo>,
    min: usize,
    max: usize,
    factory: HandlerFactory<T>,
    /// Handler built at registration so factory errors surface early; used
    /// by the first worker.
    spare: Mutex<Option<Box<dyn Handler<T>>>>,
    wiring: RwLock<Wiring>,
    workbench: Arc<WorkBench<T>>,
    settings: RwLock<ManagerSettings>,
    counters: Arc<StageCounters>,

    workers: Mutex<Vec<WorkerHandle>>,
    next_worker: AtomicUsize,
    tracker: TaskTracker,
    context: OnceLock<Arc<StageContext<T>>>,
    started: AtomicBool,
    running: AtomicBool,
    /// Cancelled once every worker has exited.
    done: CancellationToken,
}

impl<T: Payload> Manager<T> {
    /// Create a manager and build its first handler.
    pub fn new(
        info: StageInfo,
        min: usize,
        max: usize,
        factory: HandlerFactory<T>,
        workbench: Arc<WorkBench<T>>,
        settings: ManagerSettings,
    ) -> ConveyorResult<Self> {
        if info.name.is_empty() {
            return Err(ConveyorError::Config("stage name must not be empty".into()));
        }
        if min < 1 {
            return Err(ConveyorError::Config(format!(
                "stage {}: at least one worker is required",
                info.name
            )));
        }
        if max < min {
            return Err(ConveyorError::Config(format!(
                "stage {}: max workers ({max}) is lower than min ({min})",
                info.name
            )));
        }

        let spare = factory(&info.name)?;

        Ok(Self {
            info: RwLock::new(info),
            min,
            max,
            factory,
            spare: Mutex::new(Some(spare)),
            wiring: RwLock::new(Wiring::default()),
            workbench,
            settings: RwLock::new(settings),
            counters: Arc::new(StageCounters::default()),
            workers: Mutex::new(Vec::new()),
            next_worker: AtomicUsize::new(0),
            tracker: TaskTracker::new(),
            context: OnceLock::new(),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            done: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> String {
        self.info.read().name.clone()
    }

    pub fn kind(&self) -> StageKind {
        self.info.read().kind
    }

    pub fn is_last(&self) -> bool {
        self.info.read().is_last
    }

    pub(crate) fn set_last(&self, is_last: bool) {
        self.info.write().is_last = is_last;
    }

    pub fn input(&self) -> Option<Arc<dyn Queue>> {
        self.wiring.read().input.clone()
    }

    pub fn output(&self) -> Option<Arc<dyn Queue>> {
        self.wiring.read().output.clone()
    }

    pub(crate) fn set_input(&self, queue: Arc<dyn Queue>) {
        self.wiring.write().input = Some(queue);
    }

    pub(crate) fn set_output(&self, queue: Arc<dyn Queue>) {
        self.wiring.write().output = Some(queue);
    }

    pub(crate) fn set_error_queue(&self, queue: Arc<dyn Queue>) {
        self.wiring.write().error = Some(queue);
    }

    pub(crate) fn set_workers_counter(&self, counter: Arc<dyn WorkersCounter>) {
        self.settings.write().counter = counter;
    }

    pub(crate) fn set_metric_period(&self, period: Duration) {
        self.settings.write().metric_period = period;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of workers still alive.
    pub fn number_of_workers(&self) -> usize {
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.join.is_finished());
        workers.len()
    }

    /// Start the minimum number of workers, the scaling loop and the
    /// completion watcher. The watcher runs on `class`, the completion
    /// barrier of this stage's kind.
    ///
    /// Idempotent.
    pub async fn start(
        self: &Arc<Self>,
        pipeline: &CancellationToken,
        class: &TaskTracker,
    ) -> ConveyorResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let info = self.info.read().clone();
        let ctx = {
            let wiring = self.wiring.read();
            let input = wiring.input.clone().ok_or_else(|| {
                ConveyorError::Config(format!("stage {} has no input queue", info.name))
            })?;
            Arc::new(StageContext {
                info: info.clone(),
                input,
                output: wiring.output.clone(),
                error: wiring.error.clone(),
                workbench: Arc::clone(&self.workbench),
                counters: Arc::clone(&self.counters),
                pipeline: pipeline.clone(),
                abort: pipeline.child_token(),
            })
        };
        let ctx = Arc::clone(self.context.get_or_init(|| ctx));

        self.running.store(true, Ordering::SeqCst);
        for _ in 0..self.min {
            self.spawn_worker(&ctx).await?;
        }

        tokio::spawn(Arc::clone(self).scale_loop(Arc::clone(&ctx)));
        class.spawn(Arc::clone(self).watch(ctx));

        tracing::debug!(
            stage = %info.name,
            kind = %info.kind,
            is_last = info.is_last,
            min = self.min,
            max = self.max,
            "Stage started"
        );
        Ok(())
    }

    /// Forceful stop: every worker abandons its current item and exits
    /// without draining the input.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(ctx) = self.context.get() {
            ctx.abort.cancel();
        }
        // Handles stay until their tasks finish so stats keep counting them.
        for worker in self.workers.lock().iter() {
            worker.retire.cancel();
        }
        tracing::debug!(stage = %self.name(), "Stage stopped");
    }

    /// Snapshot of this stage.
    pub fn stats(&self) -> ManagerStats {
        let info = self.info.read().clone();
        let wiring = self.wiring.read();
        ManagerStats {
            name: info.name,
            kind: info.kind,
            created_at: chrono::Utc::now(),
            workers: WorkersStats {
                min: self.min,
                max: self.max,
                number: self.number_of_workers(),
                active: self.counters.active.load(Ordering::SeqCst),
            },
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queue_before: wiring.input.as_ref().map(|q| q.info()),
            queue_after: wiring.output.as_ref().map(|q| q.info()),
        }
    }

    async fn spawn_worker(&self, ctx: &Arc<StageContext<T>>) -> ConveyorResult<()> {
        let spare = self.spare.lock().take();
        let handler: Arc<dyn Handler<T>> = match spare {
            Some(handler) => Arc::from(handler),
            None => Arc::from((self.factory)(&ctx.info.name)?),
        };

        let test_mode = self.settings.read().test_mode.clone();
        start_handler(handler.as_ref(), &ctx.pipeline, test_mode.as_ref()).await?;

        let id = format!(
            "{}-{}",
            ctx.info.name,
            self.next_worker.fetch_add(1, Ordering::SeqCst)
        );
        let retire = CancellationToken::new();
        let busy = Arc::new(AtomicBool::new(false));
        let worker = Worker::new(
            id.clone(),
            Arc::clone(ctx),
            handler,
            retire.clone(),
            Arc::clone(&busy),
        );
        let join = self.tracker.spawn(worker.run());

        self.workers.lock().push(WorkerHandle {
            id,
            started_at: Instant::now(),
            retire,
            busy,
            join,
        });
        Ok(())
    }

    /// Gracefully retire one worker according to the scale-down policy.
    fn retire_worker(&self) -> bool {
        let policy = self.settings.read().scale_down;
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.join.is_finished());
        if workers.len() <= self.min {
            return false;
        }

        // Oldest first: the pool is kept in spawn order.
        let position = match policy {
            ScaleDownPolicy::Oldest => 0,
            ScaleDownPolicy::PreferIdle => workers
                .iter()
                .position(|w| !w.busy.load(Ordering::SeqCst))
                .unwrap_or(0),
        };
        let worker = workers.remove(position);
        worker.retire.cancel();

        tracing::debug!(
            worker = %worker.id,
            uptime = ?worker.started_at.elapsed(),
            "Worker retired by scaling"
        );
        true
    }

    async fn scale_loop(self: Arc<Self>, ctx: Arc<StageContext<T>>) {
        let period = self.settings.read().metric_period;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ctx.pipeline.cancelled() => break,
                _ = self.done.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !self.is_running() || !ctx.input.is_active() {
                continue;
            }

            let counter = Arc::clone(&self.settings.read().counter);
            let decision = counter.check(&self.stats());
            match decision.action {
                ScaleAction::Up => {
                    for _ in 0..decision.delta {
                        if self.number_of_workers() >= self.max {
                            break;
                        }
                        if let Err(err) = self.spawn_worker(&ctx).await {
                            tracing::warn!(stage = %ctx.info.name, error = %err, "Could not add worker");
                            break;
                        }
                        tracing::debug!(stage = %ctx.info.name, "Worker added by scaling");
                    }
                }
                ScaleAction::Down => {
                    for _ in 0..decision.delta {
                        if !self.retire_worker() {
                            break;
                        }
                    }
                }
                ScaleAction::Nothing => {}
            }
        }
    }

    /// Wait for every worker to exit, then close the queue downstream of
    /// this stage.
    async fn watch(self: Arc<Self>, ctx: Arc<StageContext<T>>) {
        self.tracker.close();
        self.tracker.wait().await;
        self.running.store(false, Ordering::SeqCst);
        self.done.cancel();

        let info = &ctx.info;
        let closing = match info.kind {
            StageKind::Worker if info.is_last => ctx.error.as_ref(),
            _ => ctx.output.as_ref(),
        };
        if let Some(queue) = closing {
            queue.close();
        }

        tracing::debug!(stage = %info.name, kind = %info.kind, "All workers exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{EmptyHandler, factory};
    use crate::item::Item;
    use crate::queues::{FifoQueue, QueueKind, new_queue};
    use crate::workers::counter::ScaleDecision;
    use async_trait::async_trait;

    struct Slow;

    #[async_trait]
    impl Handler<u64> for Slow {
        async fn run(&self, _item: &Item<u64>) -> ConveyorResult<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    struct AlwaysUp;

    impl WorkersCounter for AlwaysUp {
        fn check(&self, _stats: &ManagerStats) -> ScaleDecision {
            ScaleDecision::up(1)
        }
    }

    struct AlwaysDown;

    impl WorkersCounter for AlwaysDown {
        fn check(&self, _stats: &ManagerStats) -> ScaleDecision {
            ScaleDecision::down(5)
        }
    }

    fn manager(
        info: StageInfo,
        min: usize,
        max: usize,
        settings: ManagerSettings,
    ) -> (Arc<Manager<u64>>, Arc<dyn Queue>, Arc<dyn Queue>) {
        let workbench = Arc::new(WorkBench::new(8));
        let m = Manager::new(info, min, max, EmptyHandler::factory(), workbench, settings).unwrap();
        let input: Arc<dyn Queue> = Arc::new(FifoQueue::new(8));
        let output: Arc<dyn Queue> = Arc::new(FifoQueue::new(8));
        m.set_input(input.clone());
        m.set_output(output.clone());
        (Arc::new(m), input, output)
    }

    #[test]
    fn test_validation() {
        let wb = Arc::new(WorkBench::<u64>::new(1));
        let bad = |min, max, name: &str| {
            Manager::new(
                StageInfo::worker(name, false),
                min,
                max,
                EmptyHandler::factory(),
                Arc::clone(&wb),
                ManagerSettings::default(),
            )
            .err()
        };
        assert!(matches!(bad(0, 1, "a"), Some(ConveyorError::Config(_))));
        assert!(matches!(bad(3, 2, "a"), Some(ConveyorError::Config(_))));
        assert!(matches!(bad(1, 1, ""), Some(ConveyorError::Config(_))));
        assert!(bad(1, 1, "a").is_none());
    }

    #[test]
    fn test_factory_error_surfaces_at_creation() {
        let wb = Arc::new(WorkBench::<u64>::new(1));
        let failing = factory::<u64, _>(|name| Err(ConveyorError::Config(format!("no {name}"))));
        let err = Manager::new(
            StageInfo::worker("a", false),
            1,
            1,
            failing,
            wb,
            ManagerSettings::default(),
        )
        .err();
        assert_eq!(err, Some(ConveyorError::Config("no a".into())));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_watcher_closes_output() {
        let (m, input, output) = manager(StageInfo::worker("a", false), 2, 4, ManagerSettings::default());
        let pipeline = CancellationToken::new();
        let class = TaskTracker::new();

        m.start(&pipeline, &class).await.unwrap();
        m.start(&pipeline, &class).await.unwrap();
        assert_eq!(m.number_of_workers(), 2);
        assert!(m.is_running());

        input.close();
        class.close();
        tokio::time::timeout(Duration::from_secs(1), class.wait())
            .await
            .unwrap();
        assert!(!output.is_active());
        assert_eq!(m.number_of_workers(), 0);
        assert!(!m.is_running());
    }

    #[tokio::test]
    async fn test_last_worker_stage_closes_error_queue() {
        let (m, input, output) = manager(StageInfo::worker("a", true), 1, 1, ManagerSettings::default());
        let error = new_queue(QueueKind::Fifo, 4, Arc::new(WorkBench::<u64>::new(1)));
        m.set_error_queue(error.clone());

        let class = TaskTracker::new();
        m.start(&CancellationToken::new(), &class).await.unwrap();
        input.close();
        class.close();
        class.wait().await;

        assert!(!error.is_active());
        assert!(output.is_active());
    }

    #[tokio::test]
    async fn test_start_without_input_fails() {
        let wb = Arc::new(WorkBench::<u64>::new(1));
        let m = Arc::new(
            Manager::new(
                StageInfo::worker("a", false),
                1,
                1,
                EmptyHandler::factory(),
                wb,
                ManagerSettings::default(),
            )
            .unwrap(),
        );
        let err = m
            .start(&CancellationToken::new(), &TaskTracker::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::Config(_)));
    }

    #[tokio::test]
    async fn test_scale_up_respects_max() {
        let settings = ManagerSettings {
            metric_period: Duration::from_millis(10),
            counter: Arc::new(AlwaysUp),
            ..Default::default()
        };
        let (m, input, _output) = manager(StageInfo::worker("a", false), 1, 3, settings);
        let class = TaskTracker::new();
        m.start(&CancellationToken::new(), &class).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(m.number_of_workers(), 3);
        assert_eq!(m.stats().workers.number, 3);
        input.close();
    }

    #[tokio::test]
    async fn test_scale_down_respects_min() {
        let settings = ManagerSettings {
            metric_period: Duration::from_millis(10),
            counter: Arc::new(AlwaysDown),
            ..Default::default()
        };
        let (m, input, _output) = manager(StageInfo::worker("a", false), 2, 6, settings);
        let class = TaskTracker::new();
        m.start(&CancellationToken::new(), &class).await.unwrap();
        // Grow past min by hand, then let the policy shrink it back.
        let ctx = Arc::clone(m.context.get().unwrap());
        for _ in 0..3 {
            m.spawn_worker(&ctx).await.unwrap();
        }
        assert_eq!(m.number_of_workers(), 5);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(m.number_of_workers(), 2);
        input.close();
    }

    #[tokio::test]
    async fn test_prefer_idle_retires_idle_worker() {
        let wb = Arc::new(WorkBench::new(8));
        let settings = ManagerSettings {
            scale_down: ScaleDownPolicy::PreferIdle,
            metric_period: Duration::from_secs(3600),
            ..Default::default()
        };
        let m = Arc::new(
            Manager::new(
                StageInfo::worker("a", false),
                1,
                2,
                factory(|_| Ok(Box::new(Slow) as Box<dyn Handler<u64>>)),
                Arc::clone(&wb),
                settings,
            )
            .unwrap(),
        );
        let input: Arc<dyn Queue> = Arc::new(FifoQueue::new(8));
        m.set_input(input.clone());
        m.set_output(Arc::new(FifoQueue::new(8)));

        m.start(&CancellationToken::new(), &TaskTracker::new()).await.unwrap();
        let ctx = Arc::clone(m.context.get().unwrap());
        m.spawn_worker(&ctx).await.unwrap();

        // Keep one worker busy.
        let index = wb.add(Arc::new(Item::new(1, 1))).await.unwrap();
        input.push(index).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let busy_id = {
            let workers = m.workers.lock();
            workers
                .iter()
                .find(|w| w.busy.load(Ordering::SeqCst))
                .map(|w| w.id.clone())
                .unwrap()
        };
        assert!(m.retire_worker());
        let remaining: Vec<String> = m.workers.lock().iter().map(|w| w.id.clone()).collect();
        assert_eq!(remaining, vec![busy_id]);
        input.close();
    }

    #[tokio::test]
    async fn test_stop_aborts_workers() {
        let (m, _input, output) = manager(StageInfo::worker("a", false), 2, 2, ManagerSettings::default());
        let class = TaskTracker::new();
        m.start(&CancellationToken::new(), &class).await.unwrap();

        m.stop();
        assert!(!m.is_running());
        // Nothing has yielded yet: the aborted workers are still alive.
        assert_eq!(m.number_of_workers(), 2);
        assert_eq!(m.stats().workers.number, 2);

        class.close();
        tokio::time::timeout(Duration::from_secs(1), class.wait())
            .await
            .unwrap();
        assert!(!output.is_active());
        assert_eq!(m.number_of_workers(), 0);
    }
}
