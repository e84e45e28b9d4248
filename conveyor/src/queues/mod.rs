//! Bounded queues of workbench indices connecting adjacent stages.
//!
//! Three disciplines are available:
//!
//! - [`QueueKind::Fifo`]: arrival order
//! - [`QueueKind::Stack`]: most recent first
//! - [`QueueKind::Priority`]: lowest item priority first, arrival order on ties
//!
//! All of them share one contract: `push` blocks while the queue is full and
//! fails after `close`; `pop` blocks while the queue is empty and returns
//! `None` once the queue is closed and drained.

mod fifo;
mod priority;
mod relay;
mod stack;

pub use fifo::FifoQueue;
pub use priority::PriorityQueue;
pub use stack::StackQueue;

use crate::workbench::PriorityLookup;
use async_trait::async_trait;
use conveyor_shared::ConveyorResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Queue discipline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Fifo,
    Stack,
    Priority,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Fifo => write!(f, "fifo"),
            QueueKind::Stack => write!(f, "stack"),
            QueueKind::Priority => write!(f, "priority"),
        }
    }
}

/// Point-in-time description of a queue, used by statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub kind: QueueKind,
    pub capacity: usize,
    pub count: usize,
    pub active: bool,
}

/// A bounded queue of workbench indices.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue an index, waiting while the queue is full.
    ///
    /// Fails with `QueueClosed` after [`Queue::close`].
    async fn push(&self, index: usize) -> ConveyorResult<()>;

    /// Dequeue the next index, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    async fn pop(&self) -> Option<usize>;

    /// Stop accepting pushes. Buffered indices stay poppable. Idempotent.
    fn close(&self);

    /// `false` once closed.
    fn is_active(&self) -> bool;

    /// Indices currently buffered.
    fn count(&self) -> usize;

    fn capacity(&self) -> usize;

    fn kind(&self) -> QueueKind;

    fn info(&self) -> QueueInfo {
        QueueInfo {
            kind: self.kind(),
            capacity: self.capacity(),
            count: self.count(),
            active: self.is_active(),
        }
    }
}

/// Create a queue of the given kind.
///
/// `lookup` is only consulted by priority queues. Must be called from within
/// a tokio runtime: stack and priority queues spawn their relay tasks here.
pub fn new_queue(
    kind: QueueKind,
    capacity: usize,
    lookup: Arc<dyn PriorityLookup>,
) -> Arc<dyn Queue> {
    let capacity = capacity.max(1);
    match kind {
        QueueKind::Fifo => Arc::new(FifoQueue::new(capacity)),
        QueueKind::Stack => Arc::new(StackQueue::new(capacity)),
        QueueKind::Priority => Arc::new(PriorityQueue::new(capacity, lookup)),
    }
}
