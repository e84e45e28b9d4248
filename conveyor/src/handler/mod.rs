//! Handler contract.
//!
//! A handler is the user code a stage runs for every item. Each worker owns
//! its own handler instance, built by the stage's factory from the stage
//! name, so parallel workers of one stage share nothing unless the factory
//! hands them something shared.

mod empty;
mod test_mode;

pub use empty::EmptyHandler;
pub use test_mode::TestMode;

use crate::Payload;
use crate::item::Item;
use async_trait::async_trait;
use conveyor_shared::ConveyorResult;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-worker processing logic.
///
/// Methods take `&self` because the engine may abandon a slow `run` call
/// (the item or the pipeline got cancelled) and keep it running detached
/// while the worker moves on. Use interior mutability for handler state.
#[async_trait]
pub trait Handler<T: Payload>: Send + Sync {
    /// Called once, right after the handler is created for a worker.
    async fn start(&self, _cancel: &CancellationToken) -> ConveyorResult<()> {
        Ok(())
    }

    /// Process one item.
    async fn run(&self, item: &Item<T>) -> ConveyorResult<()>;

    /// Periodic action, independent of item arrival.
    async fn tick(&self, _cancel: &CancellationToken) {}

    /// Interval for [`Handler::tick`]. `None` disables ticking.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Called once when the worker exits.
    async fn stop(&self) {}

    /// Start hook used when the conveyor runs in test mode.
    async fn start_test(&self, cancel: &CancellationToken, _mode: &TestMode) -> ConveyorResult<()> {
        self.start(cancel).await
    }

    /// Processing hook used for items submitted in test mode.
    async fn run_test(&self, item: &Item<T>, _mode: &TestMode) -> ConveyorResult<()> {
        self.run(item).await
    }
}

/// Builds one handler instance per worker from the stage name.
pub type HandlerFactory<T> =
    Arc<dyn Fn(&str) -> ConveyorResult<Box<dyn Handler<T>>> + Send + Sync>;

/// Wrap a closure into a [`HandlerFactory`].
///
/// ```ignore
/// conveyor.add_handler("parse", 1, 4, factory(|_name| Ok(Box::new(Parser::default()))))?;
/// ```
pub fn factory<T, F>(f: F) -> HandlerFactory<T>
where
    T: Payload,
    F: Fn(&str) -> ConveyorResult<Box<dyn Handler<T>>> + Send + Sync + 'static,
{
    Arc::new(f)
}
