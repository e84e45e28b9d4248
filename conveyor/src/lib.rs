//! Multi-stage concurrent pipeline engine.
//!
//! Items flow through three chains of named stages:
//!
//! - **worker** stages process items in registration order
//! - **error** stages receive items that failed a worker stage
//! - **final** stages see every item once on its way out
//!
//! Each stage runs an elastic pool of workers, one handler instance per
//! worker, scaled between a minimum and a maximum by a pluggable policy.
//! Items live in a fixed-capacity [`WorkBench`]; stages exchange workbench
//! indices over bounded FIFO, stack or priority [queues](queues).
//!
//! ```ignore
//! let conveyor = Conveyor::<String>::new(ConveyorOptions::new(16, QueueKind::Fifo))?;
//! conveyor.add_handler("upper", 1, 4, factory(|_| Ok(Box::new(Upper) as Box<dyn Handler<String>>)))?;
//! conveyor.start(&CancellationToken::new()).await?;
//!
//! let out = conveyor.run_res(Input::new("hello".to_string())).await?;
//! conveyor.wait_and_stop().await;
//! ```

pub mod conveyor;
pub mod handler;
pub mod item;
pub mod logging;
pub mod queues;
pub mod stage;
pub mod workbench;
pub mod workers;

pub use conveyor::{
    Conveyor, ConveyorOptions, ConveyorState, ConveyorStatistic, LogReporter, StatisticReporter,
};
pub use conveyor_shared::{ConveyorError, ConveyorResult};
pub use handler::{EmptyHandler, Handler, HandlerFactory, TestMode, factory};
pub use item::{Input, Item, LogTrace, SKIP_ALL_NAME, SkipTarget, Trace};
pub use logging::{init_logging, init_logging_to};
pub use queues::{Queue, QueueInfo, QueueKind};
pub use stage::{StageInfo, StageKind};
pub use workbench::{PriorityLookup, WorkBench};
pub use workers::{
    DefaultWorkersCounter, ManagerStats, ScaleAction, ScaleDecision, ScaleDownPolicy,
    WorkersCounter,
};

/// Bound on item payloads: they cross task boundaries.
pub trait Payload: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Payload for T {}
