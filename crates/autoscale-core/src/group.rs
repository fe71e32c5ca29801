//! Per-group mutable state owned by that group's worker

use crate::backlog::QueueDepth;
use crate::evaluator::BreachCounters;
use crate::model::{Dimension, ScalingDecision};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Consecutive missing cycles after which a dimension is reported degraded
pub const DEGRADED_AFTER_CYCLES: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct GroupState {
    pub group_id: String,
    /// Last count reported by the orchestrator
    pub current_instance_count: u32,
    pub last_scale_action_time: Option<DateTime<Utc>>,
    counters: HashMap<Dimension, BreachCounters>,
    staging_depths: HashMap<String, u64>,
    missing_cycles: HashMap<Dimension, u32>,
    evaluated_at: HashMap<Dimension, DateTime<Utc>>,
}

impl GroupState {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    pub fn counters(&self, dimension: Dimension) -> BreachCounters {
        self.counters.get(&dimension).copied().unwrap_or_default()
    }

    pub fn counters_mut(&mut self, dimension: Dimension) -> &mut BreachCounters {
        self.missing_cycles.remove(&dimension);
        self.counters.entry(dimension).or_default()
    }

    /// Note a cycle without a sample; counters are left untouched.
    /// Returns the number of consecutive cycles the dimension has been missing.
    pub fn mark_missing(&mut self, dimension: Dimension) -> u32 {
        let missing = self.missing_cycles.entry(dimension).or_insert(0);
        *missing = missing.saturating_add(1);
        *missing
    }

    pub fn is_degraded(&self, dimension: Dimension) -> bool {
        self.missing_cycles.get(&dimension).copied().unwrap_or(0) >= DEGRADED_AFTER_CYCLES
    }

    /// True only on the cycle the dimension crossed into the degraded state.
    pub fn became_degraded(&self, dimension: Dimension) -> bool {
        self.missing_cycles.get(&dimension).copied() == Some(DEGRADED_AFTER_CYCLES)
    }

    /// Claim a reading for evaluation. Returns false when a reading this old
    /// or newer was already evaluated, so a repeated reading never counts twice.
    pub fn claim_sample(&mut self, dimension: Dimension, timestamp: DateTime<Utc>) -> bool {
        match self.evaluated_at.get(&dimension) {
            Some(last) if timestamp <= *last => false,
            _ => {
                self.evaluated_at.insert(dimension, timestamp);
                true
            }
        }
    }

    /// Queue depths seen on the previous cycle.
    pub fn staging_depths(&self) -> &HashMap<String, u64> {
        &self.staging_depths
    }

    pub fn remember_depths(&mut self, queues: &[QueueDepth]) {
        self.staging_depths = queues
            .iter()
            .map(|q| (q.name.clone(), q.messages))
            .collect();
    }

    /// Fold an emitted decision back into the state.
    pub fn record(&mut self, decision: &ScalingDecision) {
        if decision.changes_count() {
            self.last_scale_action_time = Some(decision.timestamp);
        }
    }
}
