use super::{Queue, QueueKind};
use async_trait::async_trait;
use conveyor_shared::{ConveyorError, ConveyorResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Arrival-order queue backed by a single bounded channel.
///
/// Input and output are the same buffer, so closing needs no drain step:
/// dropping the sender lets receivers see `None` right after the last index.
pub struct FifoQueue {
    tx: Mutex<Option<mpsc::Sender<usize>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<usize>>,
    count: AtomicUsize,
    active: AtomicBool,
    capacity: usize,
}

impl FifoQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            count: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            capacity,
        }
    }
}

#[async_trait]
impl Queue for FifoQueue {
    async fn push(&self, index: usize) -> ConveyorResult<()> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| ConveyorError::QueueClosed("fifo".into()))?;

        let permit = tx
            .reserve()
            .await
            .map_err(|_| ConveyorError::QueueClosed("fifo".into()))?;
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
            tracing::trace!("FIFO queue closed");
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
        QueueKind::Fifo
    }
}
