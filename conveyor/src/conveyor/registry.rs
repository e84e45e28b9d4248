//! Rendezvous between `run_res` callers and the system final stage.

use crate::Payload;
use crate::handler::{Handler, HandlerFactory};
use crate::item::Item;
use async_trait::async_trait;
use conveyor_shared::ConveyorResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Name of the built-in first final stage.
pub const SYSTEM_FINAL_NAME: &str = "final-system-handler";

/// Pending synchronous submissions, keyed by item id.
///
/// Scoped to one conveyor instance.
#[derive(Debug, Default)]
pub struct ResultRegistry {
    slots: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and get the receiver that fires once the item reaches
    /// the system final stage.
    pub fn register(&self, id: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);
        rx
    }

    /// Wake the caller waiting on `id`, if any. Returns whether one was
    /// registered.
    pub fn fulfill(&self, id: u64) -> bool {
        match self.slots.lock().remove(&id) {
            // The caller may have gone away in the meantime.
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Drop the entry of an abandoned wait.
    pub fn forget(&self, id: u64) {
        self.slots.lock().remove(&id);
    }

    /// Drop every entry; waiting callers see their channel closed.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// Handler of the system final stage.
pub(crate) struct SystemFinalHandler {
    registry: Arc<ResultRegistry>,
}

impl SystemFinalHandler {
    pub fn factory<T: Payload>(registry: Arc<ResultRegistry>) -> HandlerFactory<T> {
        Arc::new(move |_name: &str| {
            Ok(Box::new(SystemFinalHandler {
                registry: Arc::clone(&registry),
            }) as Box<dyn Handler<T>>)
        })
    }
}

#[async_trait]
impl<T: Payload> Handler<T> for SystemFinalHandler {
    async fn run(&self, item: &Item<T>) -> ConveyorResult<()> {
        if self.registry.fulfill(item.id()) {
            tracing::trace!(item_id = item.id(), "Result delivered");
        }
        Ok(())
    }
}
