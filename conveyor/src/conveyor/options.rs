use crate::queues::QueueKind;
use crate::workers::{DEFAULT_METRIC_PERIOD, ScaleDownPolicy};
use conveyor_shared::{ConveyorError, ConveyorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long `run_res` waits for a result before giving up.
pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Construction-time options of a [`Conveyor`](super::Conveyor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorOptions {
    // === Identity ===
    /// Node name. Empty means a generated UUID.
    pub name: String,

    // === Capacity ===
    /// Capacity of every queue between two stages.
    pub branch_length: usize,
    /// Workbench slots, i.e. items in flight across the whole conveyor.
    /// Defaults to `branch_length`.
    pub workbench_capacity: Option<usize>,
    /// Queue discipline for every queue of the conveyor.
    pub queue_kind: QueueKind,

    // === Scheduling ===
    /// Interval between two scaling decisions of each stage.
    pub metric_period: Duration,
    pub scale_down: ScaleDownPolicy,
    /// Priority of items submitted without one.
    pub default_priority: i64,
    /// Upper bound on a `run_res` wait, independent of the caller's token.
    pub result_timeout: Duration,
}

impl Default for ConveyorOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            branch_length: 1,
            workbench_capacity: None,
            queue_kind: QueueKind::default(),
            metric_period: DEFAULT_METRIC_PERIOD,
            scale_down: ScaleDownPolicy::default(),
            default_priority: 0,
            result_timeout: DEFAULT_RESULT_TIMEOUT,
        }
    }
}

impl ConveyorOptions {
    pub fn new(branch_length: usize, queue_kind: QueueKind) -> Self {
        Self {
            branch_length,
            queue_kind,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Normalise the options: fill in the name, raise capacities to at
    /// least one. Rejects zero periods.
    pub fn sanitize(mut self) -> ConveyorResult<Self> {
        if self.name.is_empty() {
            self.name = uuid::Uuid::new_v4().to_string();
        }
        self.branch_length = self.branch_length.max(1);
        self.workbench_capacity = Some(
            self.workbench_capacity
                .unwrap_or(self.branch_length)
                .max(1),
        );

        if self.metric_period.is_zero() {
            return Err(ConveyorError::Config("metric_period must be positive".into()));
        }
        if self.result_timeout.is_zero() {
            return Err(ConveyorError::Config("result_timeout must be positive".into()));
        }
        Ok(self)
    }

    pub fn workbench_capacity(&self) -> usize {
        self.workbench_capacity.unwrap_or(self.branch_length).max(1)
    }
}
