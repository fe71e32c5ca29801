//! Shared value types passed between the evaluator, the engine and adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Resource dimension a sample was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Cpu,
    Memory,
    Disk,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Cpu, Dimension::Memory, Dimension::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Disk => "disk",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reading for one dimension of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub dimension: Dimension,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSample {
    pub fn new(dimension: Dimension, value: f64) -> Self {
        Self {
            dimension,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Severity stage reached by a reading, ordered by increasing severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    None,
    One,
    Two,
    Three,
}

impl Stage {
    pub fn level(&self) -> u8 {
        match self {
            Stage::None => 0,
            Stage::One => 1,
            Stage::Two => 2,
            Stage::Three => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage{}", self.level())
    }
}

/// Why a decision changed (or did not change) the instance count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingReason {
    Backlog,
    StageOne,
    StageTwo,
    Shutdown,
    None,
}

impl fmt::Display for ScalingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalingReason::Backlog => "backlog",
            ScalingReason::StageOne => "stage1",
            ScalingReason::StageTwo => "stage2",
            ScalingReason::Shutdown => "shutdown",
            ScalingReason::None => "none",
        };
        f.write_str(s)
    }
}

/// The engine's single output per cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDecision {
    pub id: Uuid,
    pub group_id: String,
    /// Instance count the decision was computed from
    pub current_count: u32,
    pub target_count: u32,
    pub reason: ScalingReason,
    pub timestamp: DateTime<Utc>,
}

impl ScalingDecision {
    pub fn new(
        group_id: impl Into<String>,
        current_count: u32,
        target_count: u32,
        reason: ScalingReason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            current_count,
            target_count,
            reason,
            timestamp,
        }
    }

    /// True when executing this decision would change the instance count.
    pub fn changes_count(&self) -> bool {
        self.target_count != self.current_count
    }

    pub fn is_shutdown(&self) -> bool {
        self.reason == ScalingReason::Shutdown
    }
}
