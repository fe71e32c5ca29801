//! Staged threshold evaluation with per-stage hysteresis
//!
//! Each reading is classified into the highest stage whose limit it meets.
//! The active stage's breach counter grows by one and every other stage's
//! counter resets, so only a sustained run at a stage can authorize it.

use crate::model::{Dimension, ResourceSample, Stage};
use crate::policy::{DimensionPolicy, ShutdownThresholds};
use serde::Serialize;

/// Consecutive-breach counters for one dimension of one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreachCounters {
    stage_one: u32,
    stage_two: u32,
    stage_three: u32,
}

impl BreachCounters {
    pub fn get(&self, stage: Stage) -> u32 {
        match stage {
            Stage::None => 0,
            Stage::One => self.stage_one,
            Stage::Two => self.stage_two,
            Stage::Three => self.stage_three,
        }
    }

    /// Count a reading at `stage`, resetting the other stages.
    fn record(&mut self, stage: Stage) -> u32 {
        let active = self.get(stage).saturating_add(1);
        *self = BreachCounters::default();
        match stage {
            Stage::None => 0,
            Stage::One => {
                self.stage_one = active;
                active
            }
            Stage::Two => {
                self.stage_two = active;
                active
            }
            Stage::Three => {
                self.stage_three = active;
                active
            }
        }
    }
}

/// Outcome of evaluating one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub dimension: Dimension,
    pub value: f64,
    /// Raw stage of the reading, reported for alerting
    pub stage: Stage,
    /// Stage the engine may act upon; `Stage::None` until the breach persists
    pub authorized: Stage,
    /// Consecutive readings at `stage`, including this one
    pub consecutive: u32,
}

impl StageResult {
    pub fn is_authorized(&self) -> bool {
        self.authorized != Stage::None
    }
}

/// Classify `sample` and update the dimension's counters.
pub fn evaluate(
    sample: &ResourceSample,
    policy: &DimensionPolicy,
    shutdown_thresholds: &ShutdownThresholds,
    counters: &mut BreachCounters,
) -> StageResult {
    let stage = policy.thresholds.stage_for(sample.value);
    let consecutive = counters.record(stage);

    let authorized = match shutdown_thresholds.for_stage(stage) {
        Some(required) if consecutive >= required => stage,
        _ => Stage::None,
    };

    StageResult {
        dimension: sample.dimension,
        value: sample.value,
        stage,
        authorized,
        consecutive,
    }
}
