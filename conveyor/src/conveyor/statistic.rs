use crate::workers::ManagerStats;
use serde::{Deserialize, Serialize};

/// Snapshot of a whole conveyor: every stage of every chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConveyorStatistic {
    /// `<name>-<unix seconds at construction>`.
    pub cluster_id: String,
    pub node_id: String,
    pub workers: Vec<ManagerStats>,
    pub errors: Vec<ManagerStats>,
    pub finals: Vec<ManagerStats>,
}

impl ConveyorStatistic {
    /// Stage snapshot by name, across all chains.
    pub fn stage(&self, name: &str) -> Option<&ManagerStats> {
        self.workers
            .iter()
            .chain(&self.errors)
            .chain(&self.finals)
            .find(|s| s.name == name)
    }
}
