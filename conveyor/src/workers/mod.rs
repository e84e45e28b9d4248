//! Stage workers, their controller and the scaling policy.

mod counter;
mod manager;
mod stats;
mod worker;

pub use counter::{DefaultWorkersCounter, ScaleAction, ScaleDecision, ScaleDownPolicy, WorkersCounter};
pub use manager::{DEFAULT_METRIC_PERIOD, Manager, ManagerSettings};
pub use stats::{ManagerStats, WorkersStats};
pub use worker::StageCounters;
