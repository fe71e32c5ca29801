//! Backlog demand estimation
//!
//! Sizes a group from its queue backlog: one instance per `backlog_goal`
//! queued messages. Staging queues can be filtered out first so messages that
//! are only being staged do not trigger a scale up.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Target queue depth per instance and the minimum gap between scale actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogProfile {
    pub scaling_delay: Duration,
    pub backlog_goal: u64,
}

impl Default for BacklogProfile {
    fn default() -> Self {
        Self {
            scaling_delay: Duration::from_secs(10),
            backlog_goal: 300,
        }
    }
}

impl BacklogProfile {
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.backlog_goal == 0 {
            return Err(ConfigError::InvalidBacklogGoal {
                profile: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Ready-message count of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub name: String,
    pub messages: u64,
}

impl QueueDepth {
    pub fn new(name: impl Into<String>, messages: u64) -> Self {
        Self {
            name: name.into(),
            messages,
        }
    }
}

/// Recommended change in instance count for the given backlog.
///
/// Returns `desired - current` where `desired = ceil(queue_depth / backlog_goal)`.
/// A goal of zero yields no recommendation.
pub fn estimate(queue_depth: u64, backlog_goal: u64, current_instance_count: u32) -> i64 {
    if backlog_goal == 0 {
        return 0;
    }

    let desired = queue_depth.div_ceil(backlog_goal);
    let desired = i64::try_from(desired).unwrap_or(i64::MAX);
    desired.saturating_sub(i64::from(current_instance_count))
}

/// Pass/no-pass filter for staging queues
///
/// A queue named `<target><indicator>...` is a staging queue. It is counted
/// only while its depth is not growing; a growing staging queue is holding
/// messages that are not ready for processing yet.
#[derive(Debug, Clone)]
pub struct StagingQueueFilter {
    pattern: Regex,
}

impl StagingQueueFilter {
    pub fn new(target_queue: &str, indicator: &str) -> Result<Self, ConfigError> {
        let expr = format!("^{}{}.+$", regex::escape(target_queue), indicator);
        let pattern = Regex::new(&expr).map_err(|e| ConfigError::InvalidStagingIndicator {
            message: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    pub fn is_staging(&self, queue_name: &str) -> bool {
        self.pattern.is_match(queue_name)
    }

    /// Whether a queue counts towards the backlog this cycle.
    pub fn passes(&self, queue: &QueueDepth, previous: &HashMap<String, u64>) -> bool {
        if !self.is_staging(&queue.name) {
            return true;
        }
        match previous.get(&queue.name) {
            Some(last) if queue.messages > *last => {
                debug!(
                    queue = %queue.name,
                    previous = *last,
                    current = queue.messages,
                    "Staging queue still growing; excluded from backlog"
                );
                false
            }
            _ => true,
        }
    }
}

/// Total messages across the queues that pass the staging filter.
pub fn aggregate_depth(
    queues: &[QueueDepth],
    filter: Option<&StagingQueueFilter>,
    previous: &HashMap<String, u64>,
) -> u64 {
    queues
        .iter()
        .filter(|q| filter.map(|f| f.passes(q, previous)).unwrap_or(true))
        .map(|q| q.messages)
        .sum()
}
