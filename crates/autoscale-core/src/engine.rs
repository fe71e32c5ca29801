//! Scaling decision engine
//!
//! Combines the authorized stages of every dimension with the backlog
//! recommendation into exactly one [`ScalingDecision`] per cycle. The engine
//! is pure: it reads [`GroupState`] and the clock value it is handed, and the
//! caller folds the result back with [`GroupState::record`].

use crate::backlog::BacklogProfile;
use crate::error::ConfigError;
use crate::evaluator::StageResult;
use crate::group::GroupState;
use crate::model::{ScalingDecision, ScalingReason, Stage};
use crate::policy::{AutoscalePolicy, GroupSpec, StageReduction};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Decision engine bound to one group's bounds and backlog profile
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    group: GroupSpec,
    profile: BacklogProfile,
    reduction: StageReduction,
}

impl DecisionEngine {
    pub fn new(policy: &AutoscalePolicy, group: GroupSpec) -> Result<Self, ConfigError> {
        policy.validate_group(&group)?;
        let profile = policy.profile_for(&group)?.clone();
        Ok(Self {
            group,
            profile,
            reduction: policy.reduction,
        })
    }

    pub fn group(&self) -> &GroupSpec {
        &self.group
    }

    pub fn profile(&self) -> &BacklogProfile {
        &self.profile
    }

    pub fn decide(
        &self,
        state: &GroupState,
        stage_results: &[StageResult],
        backlog_delta: i64,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        let current = state.current_instance_count;
        let maximum = self.group.maximum_instances;

        let authorized = stage_results
            .iter()
            .map(|r| r.authorized)
            .max()
            .unwrap_or(Stage::None);

        let (target, reason) = match authorized {
            Stage::Three => (0, ScalingReason::Shutdown),
            Stage::Two => (
                self.reduce(current, self.reduction.stage_two_retain),
                ScalingReason::StageTwo,
            ),
            Stage::One => (
                self.reduce(current, self.reduction.stage_one_retain),
                ScalingReason::StageOne,
            ),
            Stage::None => self.size_for_backlog(current, backlog_delta),
        };

        let (target, reason) = if reason != ScalingReason::Shutdown
            && target != current
            && self.within_scaling_delay(state, now)
        {
            debug!(
                group = %self.group.id,
                current,
                suppressed_target = target,
                suppressed_reason = %reason,
                "Scale action suppressed by scaling delay"
            );
            (current, ScalingReason::None)
        } else {
            (target, reason)
        };

        // The cap wins over pacing; a capped count is still an action.
        let capped = target.min(maximum);
        let reason = if reason == ScalingReason::None && capped != current {
            ScalingReason::Backlog
        } else {
            reason
        };

        ScalingDecision::new(self.group.id.clone(), current, capped, reason, now)
    }

    /// Keep `retain` of the running instances, removing at least one.
    fn reduce(&self, current: u32, retain: f64) -> u32 {
        if current == 0 {
            return 0;
        }
        let kept = (f64::from(current) * retain).floor() as u32;
        kept.min(current - 1)
    }

    fn size_for_backlog(&self, current: u32, backlog_delta: i64) -> (u32, ScalingReason) {
        let minimum = i64::from(self.group.minimum_instances);
        let maximum = i64::from(self.group.maximum_instances);
        let desired = i64::from(current).saturating_add(backlog_delta);
        let target = desired.clamp(minimum, maximum) as u32;

        if target == current {
            (target, ScalingReason::None)
        } else {
            (target, ScalingReason::Backlog)
        }
    }

    fn within_scaling_delay(&self, state: &GroupState, now: DateTime<Utc>) -> bool {
        let Some(last) = state.last_scale_action_time else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < self.profile.scaling_delay,
            // Last action stamped in the future: treat as just happened.
            Err(_) => true,
        }
    }
}
