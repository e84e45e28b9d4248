use crate::queues::QueueInfo;
use crate::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker pool counters of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersStats {
    pub min: usize,
    pub max: usize,
    /// Workers currently in the pool.
    pub number: usize,
    /// Workers currently processing an item.
    pub active: usize,
}

/// Point-in-time snapshot of one stage.
///
/// Consumed by the scaling policy and by statistic reporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub name: String,
    pub kind: StageKind,
    pub created_at: DateTime<Utc>,
    pub workers: WorkersStats,
    pub processed: u64,
    pub failed: u64,
    /// Queue feeding this stage, if any.
    pub queue_before: Option<QueueInfo>,
    /// Queue this stage forwards to, if any.
    pub queue_after: Option<QueueInfo>,
}

impl ManagerStats {
    /// Occupancy of the upstream queue in `0.0..=1.0`.
    pub fn input_occupancy(&self) -> Option<f64> {
        self.queue_before
            .as_ref()
            .map(|q| q.count as f64 / q.capacity.max(1) as f64)
    }
}
