//! A single worker: one task, one handler instance, one stage.

use crate::Payload;
use crate::handler::{Handler, TestMode};
use crate::item::Item;
use crate::queues::Queue;
use crate::stage::{StageInfo, StageKind};
use crate::workbench::WorkBench;
use conveyor_shared::ConveyorError;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Per-stage counters shared by all workers of the stage.
#[derive(Debug, Default)]
pub struct StageCounters {
    pub active: AtomicUsize,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
}

/// Everything a worker needs to know about its stage, fixed at start.
pub(crate) struct StageContext<T> {
    pub info: StageInfo,
    pub input: Arc<dyn Queue>,
    pub output: Option<Arc<dyn Queue>>,
    pub error: Option<Arc<dyn Queue>>,
    pub workbench: Arc<WorkBench<T>>,
    pub counters: Arc<StageCounters>,
    /// Root token of the conveyor.
    pub pipeline: CancellationToken,
    /// Stage-wide token: child of `pipeline`, cancelled by a forceful stop.
    pub abort: CancellationToken,
}

impl<T> StageContext<T> {
    /// Queue an item goes to after this stage, `None` when it leaves the
    /// pipeline here.
    fn next_hop(&self, failed: bool) -> Option<&Arc<dyn Queue>> {
        match self.info.kind {
            StageKind::Worker if failed => self.error.as_ref(),
            StageKind::Worker | StageKind::Error => self.output.as_ref(),
            StageKind::Final if self.info.is_last => None,
            StageKind::Final => self.output.as_ref(),
        }
    }
}

/// Outcome of racing a handler call against cancellation.
enum Invocation {
    Done(Result<(), ConveyorError>),
    /// The stage-wide token fired; the worker must stop.
    Halted(ConveyorError),
}

pub(crate) struct Worker<T: Payload> {
    id: String,
    ctx: Arc<StageContext<T>>,
    handler: Arc<dyn Handler<T>>,
    retire: CancellationToken,
    busy: Arc<AtomicBool>,
}

impl<T: Payload> Worker<T> {
    pub fn new(
        id: String,
        ctx: Arc<StageContext<T>>,
        handler: Arc<dyn Handler<T>>,
        retire: CancellationToken,
        busy: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            ctx,
            handler,
            retire,
            busy,
        }
    }

    /// Main loop. Returns once the input is closed and drained, the worker
    /// is retired, or the stage is aborted.
    pub async fn run(self) {
        tracing::debug!(stage = %self.ctx.info.name, worker = %self.id, "Worker started");

        let mut ticker = self.handler.tick_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let index = tokio::select! {
                _ = self.ctx.abort.cancelled() => {
                    tracing::debug!(worker = %self.id, "Worker aborted");
                    break;
                }
                _ = self.retire.cancelled() => {
                    tracing::debug!(worker = %self.id, "Worker retired");
                    break;
                }
                _ = next_tick(&mut ticker) => {
                    self.tick().await;
                    continue;
                }
                index = self.ctx.input.pop() => match index {
                    Some(index) => index,
                    None => {
                        tracing::debug!(worker = %self.id, "Input closed and drained");
                        break;
                    }
                },
            };

            if !self.process(index).await {
                break;
            }
        }

        self.handler.stop().await;
        tracing::debug!(stage = %self.ctx.info.name, worker = %self.id, "Worker stopped");
    }

    /// Handle one index. Returns `false` when the worker must stop.
    async fn process(&self, index: usize) -> bool {
        let item = match self.ctx.workbench.get(index) {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::warn!(worker = %self.id, index, "Popped an empty workbench slot");
                return true;
            }
            Err(err) => {
                tracing::warn!(worker = %self.id, index, error = %err, "Popped an invalid index");
                return true;
            }
        };

        let name = &self.ctx.info.name;
        item.log_trace_elapsed(|| format!("[{name}] time in queue"));
        item.set_last_handler(name);

        let mut keep_going = true;
        let failed = match item.need_to_skip(&self.ctx.info) {
            Ok(true) => {
                tracing::trace!(worker = %self.id, item_id = item.id(), "Item skipped");
                false
            }
            Ok(false) => {
                let result = match self.invoke(&item).await {
                    Invocation::Done(result) => result,
                    Invocation::Halted(err) => {
                        keep_going = false;
                        Err(err)
                    }
                };
                self.record(&item, result)
            }
            Err(err) => {
                tracing::debug!(worker = %self.id, item_id = item.id(), error = %err, "Skip target unreachable");
                self.record(&item, Err(err))
            }
        };

        self.forward(index, &item, failed).await;
        keep_going
    }

    /// Run the handler in its own task and race it against the stage token
    /// and the item token. A lost race leaves the handler task running
    /// detached.
    async fn invoke(&self, item: &Arc<Item<T>>) -> Invocation {
        self.busy.store(true, Ordering::SeqCst);
        self.ctx.counters.active.fetch_add(1, Ordering::SeqCst);

        let handler = Arc::clone(&self.handler);
        let task_item = Arc::clone(item);
        let mut task = tokio::spawn(async move {
            match task_item.test_mode().cloned() {
                Some(mode) => handler.run_test(&task_item, &mode).await,
                None => handler.run(&task_item).await,
            }
        });

        let outcome = tokio::select! {
            _ = self.ctx.abort.cancelled() => {
                item.cancel();
                let by = if self.ctx.pipeline.is_cancelled() { "pipeline" } else { "stage stop" };
                Invocation::Halted(ConveyorError::Canceled(format!(
                    "{} processing is stopped by {by}",
                    self.id
                )))
            }
            _ = item.cancel_token().cancelled() => Invocation::Done(Err(ConveyorError::Canceled(
                format!("{} processing is stopped by item context", self.id),
            ))),
            joined = &mut task => Invocation::Done(match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(ConveyorError::Panic(panic_message(err.into_panic()))),
                Err(err) => Err(ConveyorError::Internal(err.to_string())),
            }),
        };

        self.ctx.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
        outcome
    }

    /// Periodic hook, isolated like `invoke` so a panic only costs one tick.
    async fn tick(&self) {
        let handler = Arc::clone(&self.handler);
        let cancel = self.ctx.pipeline.clone();
        let task = tokio::spawn(async move { handler.tick(&cancel).await });
        match task.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                let msg = panic_message(err.into_panic());
                tracing::warn!(worker = %self.id, panic = %msg, "Tick panicked");
            }
            Err(err) => tracing::warn!(worker = %self.id, error = %err, "Tick task failed"),
        }
    }

    /// Store the outcome on the item. Returns whether it failed.
    fn record(&self, item: &Item<T>, result: Result<(), ConveyorError>) -> bool {
        let name = &self.ctx.info.name;
        match result {
            Ok(()) => {
                self.ctx.counters.processed.fetch_add(1, Ordering::Relaxed);
                item.log_trace_elapsed(|| format!("[{name}] success"));
                false
            }
            Err(err) => {
                self.ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                item.log_trace_elapsed(|| format!("[{name}] has an error"));
                if self.ctx.info.kind == StageKind::Final {
                    // Final stages route the same way whatever happens.
                    tracing::warn!(stage = %name, item_id = item.id(), error = %err, "Final handler failed");
                } else {
                    item.set_error_handler(name);
                    item.set_error(err);
                }
                true
            }
        }
    }

    /// Push the index to its next hop, or take the item out of the
    /// pipeline when there is none.
    async fn forward(&self, index: usize, item: &Item<T>, failed: bool) {
        let Some(queue) = self.ctx.next_hop(failed) else {
            if !(self.ctx.info.kind == StageKind::Final && self.ctx.info.is_last) {
                tracing::warn!(worker = %self.id, item_id = item.id(), "No downstream queue, item dropped");
            }
            self.exit(index, item);
            return;
        };

        let pushed = tokio::select! {
            result = queue.push(index) => result,
            _ = self.ctx.pipeline.cancelled() => Err(ConveyorError::Canceled("pipeline".into())),
        };

        if let Err(err) = pushed {
            tracing::warn!(worker = %self.id, item_id = item.id(), error = %err, "Could not forward item, dropped");
            self.exit(index, item);
        }
    }

    fn exit(&self, index: usize, item: &Item<T>) {
        self.ctx.workbench.clean(index);
        item.finish();
        tracing::trace!(worker = %self.id, item_id = item.id(), "Item left the conveyor");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Start hook, in test mode when one is configured.
pub(crate) async fn start_handler<T: Payload>(
    handler: &dyn Handler<T>,
    cancel: &CancellationToken,
    mode: Option<&TestMode>,
) -> conveyor_shared::ConveyorResult<()> {
    match mode {
        Some(mode) => handler.start_test(cancel, mode).await,
        None => handler.start(cancel).await,
    }
}
