//! Stage definition for the conveyor chains.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a stage.
///
/// Worker stages do the actual processing. Error stages receive items that
/// failed a worker stage. Final stages see every item exactly once on its
/// way out of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Worker,
    Error,
    Final,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageKind::Worker => "worker",
            StageKind::Error => "error",
            StageKind::Final => "final",
        };
        f.write_str(s)
    }
}

/// Border conditions of a stage as seen by its workers.
///
/// `is_last` marks the tail of the stage's chain: the last worker stage
/// (unreachable skip targets fail there), the last error stage, or the
/// terminal final stage (items leave the pipeline there).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub name: String,
    pub kind: StageKind,
    pub is_last: bool,
}

impl StageInfo {
    pub fn new(name: impl Into<String>, kind: StageKind, is_last: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            is_last,
        }
    }

    /// Create info for a worker stage.
    pub fn worker(name: impl Into<String>, is_last: bool) -> Self {
        Self::new(name, StageKind::Worker, is_last)
    }

    /// Create info for an error stage.
    pub fn error(name: impl Into<String>, is_last: bool) -> Self {
        Self::new(name, StageKind::Error, is_last)
    }

    /// Create info for a final stage.
    pub fn final_stage(name: impl Into<String>, is_last: bool) -> Self {
        Self::new(name, StageKind::Final, is_last)
    }
}
