//! Scaling policy.
//!
//! Each manager asks its counter for a decision once per metric period.
//! Policies are pure functions of a [`ManagerStats`] snapshot.

use super::stats::ManagerStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    Up,
    Down,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDecision {
    pub action: ScaleAction,
    pub delta: usize,
}

impl ScaleDecision {
    pub const NOTHING: ScaleDecision = ScaleDecision {
        action: ScaleAction::Nothing,
        delta: 0,
    };

    pub fn up(delta: usize) -> Self {
        Self {
            action: ScaleAction::Up,
            delta,
        }
    }

    pub fn down(delta: usize) -> Self {
        Self {
            action: ScaleAction::Down,
            delta,
        }
    }
}

/// Decides how a stage's worker pool should change.
///
/// Managers clamp the decision to the stage's `[min, max]` range, so a
/// policy cannot push the pool outside it.
pub trait WorkersCounter: Send + Sync {
    fn check(&self, stats: &ManagerStats) -> ScaleDecision;
}

/// Reference policy: grow above 50% upstream occupancy, shrink below 10%.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWorkersCounter;

impl DefaultWorkersCounter {
    const UP_THRESHOLD: f64 = 0.5;
    const DOWN_THRESHOLD: f64 = 0.1;
}

impl WorkersCounter for DefaultWorkersCounter {
    fn check(&self, stats: &ManagerStats) -> ScaleDecision {
        let Some(occupancy) = stats.input_occupancy() else {
            return ScaleDecision::NOTHING;
        };
        let workers = &stats.workers;

        if workers.number < workers.min {
            return ScaleDecision::up(1);
        }
        if occupancy > Self::UP_THRESHOLD && workers.number < workers.max {
            return ScaleDecision::up(1);
        }
        if occupancy < Self::DOWN_THRESHOLD && workers.number > workers.min {
            return ScaleDecision::down(1);
        }
        ScaleDecision::NOTHING
    }
}

/// Which worker a scale-down retires.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDownPolicy {
    /// The longest-running worker, busy or not.
    #[default]
    Oldest,
    /// An idle worker if there is one, otherwise the oldest.
    PreferIdle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::{QueueInfo, QueueKind};
    use crate::stage::StageKind;
    use crate::workers::stats::WorkersStats;

    fn stats(number: usize, count: Option<usize>) -> ManagerStats {
        ManagerStats {
            name: "stage".into(),
            kind: StageKind::Worker,
            created_at: chrono::Utc::now(),
            workers: WorkersStats {
                min: 2,
                max: 4,
                number,
                active: 0,
            },
            processed: 0,
            failed: 0,
            queue_before: count.map(|count| QueueInfo {
                kind: QueueKind::Fifo,
                capacity: 10,
                count,
                active: true,
            }),
            queue_after: None,
        }
    }

    #[test]
    fn test_entry_stage_never_scales() {
        let c = DefaultWorkersCounter;
        assert_eq!(c.check(&stats(0, None)), ScaleDecision::NOTHING);
        assert_eq!(c.check(&stats(10, None)), ScaleDecision::NOTHING);
    }

    #[test]
    fn test_below_min_scales_up() {
        let c = DefaultWorkersCounter;
        assert_eq!(c.check(&stats(1, Some(5))), ScaleDecision::up(1));
        assert_eq!(c.check(&stats(0, Some(0))), ScaleDecision::up(1));
    }

    #[test]
    fn test_busy_queue_scales_up_until_max() {
        let c = DefaultWorkersCounter;
        assert_eq!(c.check(&stats(2, Some(6))), ScaleDecision::up(1));
        assert_eq!(c.check(&stats(3, Some(9))), ScaleDecision::up(1));
        assert_eq!(c.check(&stats(4, Some(10))), ScaleDecision::NOTHING);
    }

    #[test]
    fn test_idle_queue_scales_down_until_min() {
        let c = DefaultWorkersCounter;
        assert_eq!(c.check(&stats(4, Some(0))), ScaleDecision::down(1));
        assert_eq!(c.check(&stats(3, Some(0))), ScaleDecision::down(1));
        assert_eq!(c.check(&stats(2, Some(0))), ScaleDecision::NOTHING);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let c = DefaultWorkersCounter;
        // Exactly 50% and exactly 10% leave the pool alone.
        assert_eq!(c.check(&stats(3, Some(5))), ScaleDecision::NOTHING);
        assert_eq!(c.check(&stats(3, Some(1))), ScaleDecision::NOTHING);
    }

    #[test]
    fn test_scale_down_policy_serde() {
        let p: ScaleDownPolicy = serde_json::from_str("\"prefer_idle\"").unwrap();
        assert_eq!(p, ScaleDownPolicy::PreferIdle);
        assert_eq!(ScaleDownPolicy::default(), ScaleDownPolicy::Oldest);
    }
}
