//! Skip protocol: decides per item and per stage whether a worker stage's
//! handler is bypassed.

use super::Item;
use crate::stage::{StageInfo, StageKind};
use conveyor_shared::{ConveyorError, ConveyorResult};
use std::fmt;

/// Reserved stage name meaning "skip everything".
pub const SKIP_ALL_NAME: &str = "###SKIP_EVERYTHING_BY_THE_END";

/// Pending resume target of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipTarget {
    /// Resume at the named worker stage.
    Stage(String),
    /// Reserved sentinel. Worker stages treat it as "no pending skip".
    Everything,
}

impl From<&str> for SkipTarget {
    fn from(name: &str) -> Self {
        if name == SKIP_ALL_NAME {
            SkipTarget::Everything
        } else {
            SkipTarget::Stage(name.to_string())
        }
    }
}

impl From<String> for SkipTarget {
    fn from(name: String) -> Self {
        if name == SKIP_ALL_NAME {
            SkipTarget::Everything
        } else {
            SkipTarget::Stage(name)
        }
    }
}

impl fmt::Display for SkipTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipTarget::Stage(name) => f.write_str(name),
            SkipTarget::Everything => f.write_str(SKIP_ALL_NAME),
        }
    }
}

impl<T> Item<T> {
    /// Evaluate the skip protocol for `stage`.
    ///
    /// Returns `Ok(true)` when the handler must be bypassed, `Ok(false)` when
    /// it must run, and `Err(UnreachableSkip)` when the item asked to resume
    /// at a stage the worker chain no longer contains.
    pub fn need_to_skip(&self, stage: &StageInfo) -> ConveyorResult<bool> {
        let mut state = self.state.write();

        // Error and final stages are never skipped.
        if stage.kind != StageKind::Worker {
            state.skip_to = None;
            return Ok(false);
        }

        if state.skip_names.iter().any(|n| *n == stage.name) {
            return Ok(true);
        }

        if state.stopped {
            return Ok(true);
        }

        let target = match &state.skip_to {
            None | Some(SkipTarget::Everything) => return Ok(false),
            Some(SkipTarget::Stage(target)) => target,
        };

        if *target == stage.name {
            state.skip_to = None;
            return Ok(false);
        }

        if stage.is_last {
            return Err(ConveyorError::UnreachableSkip(target.clone()));
        }

        Ok(true)
    }
}
