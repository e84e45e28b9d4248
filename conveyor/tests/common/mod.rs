//! Shared handlers and builders for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use conveyor::{
    Conveyor, ConveyorError, ConveyorOptions, ConveyorResult, Handler, HandlerFactory, Item,
    QueueKind, TestMode, Trace, factory,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Payload used by routing tests: the names of the stages that ran.
pub type Visits = Vec<String>;

pub fn options(kind: QueueKind) -> ConveyorOptions {
    let mut options = ConveyorOptions::new(8, kind).with_name("it");
    options.metric_period = Duration::from_millis(50);
    options
}

/// Appends the stage name to the payload.
pub struct Append {
    pub name: String,
}

#[async_trait]
impl Handler<Visits> for Append {
    async fn run(&self, item: &Item<Visits>) -> ConveyorResult<()> {
        item.payload_mut().push(self.name.clone());
        Ok(())
    }

    async fn run_test(&self, item: &Item<Visits>, mode: &TestMode) -> ConveyorResult<()> {
        item.payload_mut().push(format!("{}:{}", self.name, mode.suffix));
        Ok(())
    }
}

pub fn append() -> HandlerFactory<Visits> {
    factory(|name| {
        Ok(Box::new(Append {
            name: name.to_string(),
        }) as Box<dyn Handler<Visits>>)
    })
}

pub struct Failing;

#[async_trait]
impl Handler<Visits> for Failing {
    async fn run(&self, _item: &Item<Visits>) -> ConveyorResult<()> {
        Err(ConveyorError::handler("refused"))
    }
}

pub fn failing() -> HandlerFactory<Visits> {
    factory(|_| Ok(Box::new(Failing) as Box<dyn Handler<Visits>>))
}

pub struct Panicking;

#[async_trait]
impl Handler<Visits> for Panicking {
    async fn run(&self, _item: &Item<Visits>) -> ConveyorResult<()> {
        panic!("handler blew up");
    }
}

pub fn panicking() -> HandlerFactory<Visits> {
    factory(|_| Ok(Box::new(Panicking) as Box<dyn Handler<Visits>>))
}

/// Appends its name and asks every later worker stage to stand aside.
pub struct StopHere {
    pub name: String,
}

#[async_trait]
impl Handler<Visits> for StopHere {
    async fn run(&self, item: &Item<Visits>) -> ConveyorResult<()> {
        item.payload_mut().push(self.name.clone());
        item.stop_processing();
        Ok(())
    }
}

pub fn stop_here() -> HandlerFactory<Visits> {
    factory(|name| {
        Ok(Box::new(StopHere {
            name: name.to_string(),
        }) as Box<dyn Handler<Visits>>)
    })
}

/// Sleeps, then succeeds.
pub struct Sleepy(pub Duration);

#[async_trait]
impl<T: conveyor::Payload> Handler<T> for Sleepy {
    async fn run(&self, _item: &Item<T>) -> ConveyorResult<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

pub fn sleepy<T: conveyor::Payload>(duration: Duration) -> HandlerFactory<T> {
    factory(move |_| Ok(Box::new(Sleepy(duration)) as Box<dyn Handler<T>>))
}

/// Counts the items it sees.
pub struct Counter(pub Arc<AtomicUsize>);

#[async_trait]
impl<T: conveyor::Payload> Handler<T> for Counter {
    async fn run(&self, _item: &Item<T>) -> ConveyorResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn counter<T: conveyor::Payload>(hits: Arc<AtomicUsize>) -> HandlerFactory<T> {
    factory(move |_| Ok(Box::new(Counter(Arc::clone(&hits))) as Box<dyn Handler<T>>))
}

/// Trace sink that keeps every line and counts flushes.
#[derive(Default)]
pub struct MemoryTrace {
    pub lines: Mutex<Vec<String>>,
    pub flushes: AtomicUsize,
    pub failed: AtomicUsize,
}

impl Trace for MemoryTrace {
    fn record(&self, line: String) {
        self.lines.lock().push(line);
    }

    fn set_error(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

impl MemoryTrace {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

/// Worker chain of `Append` stages with the given names.
pub fn chain(kind: QueueKind, names: &[&str]) -> Conveyor<Visits> {
    let conveyor = Conveyor::new(options(kind)).unwrap();
    for name in names {
        conveyor.add_handler(*name, 1, 2, append()).unwrap();
    }
    conveyor
}
