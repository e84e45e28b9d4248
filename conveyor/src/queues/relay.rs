//! Two-task relay shared by the stack and priority queues.
//!
//! ```text
//! push ──► input (1) ──► inbound task ──► body ──► outbound task ──► output (1) ──► pop
//!                              │                        ▲
//!                              └──── signals (N) ───────┘
//! ```
//!
//! The inbound task moves indices into the body and sends one signal per
//! index; the signal channel is bounded by the queue capacity, which bounds
//! the body. The outbound task takes from the body once per signal.
//!
//! Shutdown cascades: closing the input ends the inbound task, which drops
//! the signal sender; the outbound task drains what was already signalled,
//! then drops the output sender and `pop` starts returning `None`.
//!
//! Because both tasks run concurrently with callers, up to two indices may
//! be in transit outside the body and so bypass its ordering.

use super::{Queue, QueueKind};
use async_trait::async_trait;
use conveyor_shared::{ConveyorError, ConveyorResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// In-memory ordering structure behind a relay queue.
pub trait RelayBody: Send + 'static {
    fn insert(&mut self, index: usize);

    /// Next index according to the discipline.
    fn take(&mut self) -> Option<usize>;
}

pub struct RelayQueue<B> {
    tx: Mutex<Option<mpsc::Sender<usize>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<usize>>,
    count: Arc<AtomicUsize>,
    active: AtomicBool,
    capacity: usize,
    kind: QueueKind,
    _body: std::marker::PhantomData<fn() -> B>,
}

impl<B: RelayBody> RelayQueue<B> {
    pub(crate) fn spawn(kind: QueueKind, capacity: usize, body: B) -> Self {
        let capacity = capacity.max(1);
        let body = Arc::new(Mutex::new(body));

        let (in_tx, in_rx) = mpsc::channel::<usize>(1);
        let (signal_tx, signal_rx) = mpsc::channel::<()>(capacity);
        let (out_tx, out_rx) = mpsc::channel::<usize>(1);

        tokio::spawn(inbound(in_rx, signal_tx, Arc::clone(&body)));
        tokio::spawn(outbound(signal_rx, out_tx, body, kind));

        Self {
            tx: Mutex::new(Some(in_tx)),
            rx: tokio::sync::Mutex::new(out_rx),
            count: Arc::new(AtomicUsize::new(0)),
            active: AtomicBool::new(true),
            capacity,
            kind,
            _body: std::marker::PhantomData,
        }
    }
}

async fn inbound<B: RelayBody>(
    mut input: mpsc::Receiver<usize>,
    signals: mpsc::Sender<()>,
    body: Arc<Mutex<B>>,
) {
    while let Some(index) = input.recv().await {
        // Waits while the body is full.
        let Ok(permit) = signals.reserve().await else {
            break;
        };
        body.lock().insert(index);
        permit.send(());
    }
}

async fn outbound<B: RelayBody>(
    mut signals: mpsc::Receiver<()>,
    output: mpsc::Sender<usize>,
    body: Arc<Mutex<B>>,
    kind: QueueKind,
) {
    loop {
        // Take from the body only once the consumer side has room, so
        // indices wait in the ordered body rather than in the output buffer.
        let Ok(permit) = output.reserve().await else {
            break;
        };
        if signals.recv().await.is_none() {
            break;
        }
        match body.lock().take() {
            Some(index) => permit.send(index),
            None => tracing::warn!(%kind, "Relay signalled with an empty body"),
        }
    }
    tracing::trace!(%kind, "Relay queue drained");
}

#[async_trait]
impl<B: RelayBody> Queue for RelayQueue<B> {
    async fn push(&self, index: usize) -> ConveyorResult<()> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| ConveyorError::QueueClosed(self.kind.to_string()))?;

        let permit = tx
            .reserve()
            .await
            .map_err(|_| ConveyorError::QueueClosed(self.kind.to_string()))?;
        self.count.fetch_add(1, Ordering::SeqCst);
        permit.send(index);
        Ok(())
    }

    async fn pop(&self) -> Option<usize> {
        let index = self.rx.lock().await.recv().await?;
        self.count.fetch_sub(1, Ordering::SeqCst);
        Some(index)
    }

    fn close(&self) {
        if self.tx.lock().take().is_some() {
            self.active.store(false, Ordering::SeqCst);
            tracing::trace!(kind = %self.kind, "Relay queue closed");
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn kind(&self) -> QueueKind {
        self.kind
    }
}
