//! Normalized autoscale policy
//!
//! The policy is the single schema the core understands. Loaders reconcile
//! key naming and environment fallbacks before building it; the core only
//! validates invariants.

use crate::backlog::{BacklogProfile, StagingQueueFilter};
use crate::error::ConfigError;
use crate::model::{Dimension, Stage};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

pub const DEFAULT_PROFILE: &str = "default";

/// Whether higher or lower values are more severe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDirection {
    /// Utilisation: a value at or above a limit breaches it.
    Rising,
    /// Free capacity: a value at or below a limit breaches it.
    Falling,
}

/// Three stage limits for one dimension, ordered by severity
#[derive(Debug, Clone, PartialEq)]
pub struct StageThresholdSet {
    pub direction: ThresholdDirection,
    pub stage_one: f64,
    pub stage_two: f64,
    pub stage_three: f64,
}

impl StageThresholdSet {
    pub fn rising(stage_one: f64, stage_two: f64, stage_three: f64) -> Self {
        Self {
            direction: ThresholdDirection::Rising,
            stage_one,
            stage_two,
            stage_three,
        }
    }

    pub fn falling(stage_one: f64, stage_two: f64, stage_three: f64) -> Self {
        Self {
            direction: ThresholdDirection::Falling,
            stage_one,
            stage_two,
            stage_three,
        }
    }

    pub fn validate(&self, dimension: Dimension) -> Result<(), ConfigError> {
        let limits = [self.stage_one, self.stage_two, self.stage_three];
        if limits.iter().any(|l| !l.is_finite()) {
            return Err(ConfigError::NonFiniteThreshold { dimension });
        }

        let (ordered, expected) = match self.direction {
            ThresholdDirection::Rising => (
                self.stage_one < self.stage_two && self.stage_two < self.stage_three,
                "increasing",
            ),
            ThresholdDirection::Falling => (
                self.stage_one > self.stage_two && self.stage_two > self.stage_three,
                "decreasing",
            ),
        };

        if !ordered {
            return Err(ConfigError::NonMonotonicThresholds {
                dimension,
                expected,
                one: self.stage_one,
                two: self.stage_two,
                three: self.stage_three,
            });
        }

        Ok(())
    }

    /// Whether `value` meets `limit` in this set's direction.
    pub fn breaches(&self, value: f64, limit: f64) -> bool {
        match self.direction {
            ThresholdDirection::Rising => value >= limit,
            ThresholdDirection::Falling => value <= limit,
        }
    }

    /// Highest stage whose limit the value meets.
    pub fn stage_for(&self, value: f64) -> Stage {
        if self.breaches(value, self.stage_three) {
            Stage::Three
        } else if self.breaches(value, self.stage_two) {
            Stage::Two
        } else if self.breaches(value, self.stage_one) {
            Stage::One
        } else {
            Stage::None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimensionPolicy {
    pub thresholds: StageThresholdSet,
    /// Readings breaching this value raise an alert regardless of hysteresis.
    pub alert_dispatch_threshold: Option<f64>,
}

impl DimensionPolicy {
    pub fn new(thresholds: StageThresholdSet) -> Self {
        Self {
            thresholds,
            alert_dispatch_threshold: None,
        }
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_dispatch_threshold = Some(threshold);
        self
    }

    pub fn should_alert(&self, value: f64) -> bool {
        self.alert_dispatch_threshold
            .map(|t| self.thresholds.breaches(value, t))
            .unwrap_or(false)
    }
}

/// Consecutive breaching samples required before a stage is acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownThresholds {
    pub stage_one: u32,
    pub stage_two: u32,
    pub stage_three: u32,
}

impl Default for ShutdownThresholds {
    fn default() -> Self {
        Self {
            stage_one: 1,
            stage_two: 3,
            stage_three: 5,
        }
    }
}

impl ShutdownThresholds {
    pub fn for_stage(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::None => None,
            Stage::One => Some(self.stage_one),
            Stage::Two => Some(self.stage_two),
            Stage::Three => Some(self.stage_three),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (stage, value) in [(1, self.stage_one), (2, self.stage_two), (3, self.stage_three)] {
            if value == 0 {
                return Err(ConfigError::InvalidShutdownThreshold { stage });
            }
        }
        Ok(())
    }
}

/// Share of running instances kept when stage 1 or stage 2 is authorized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageReduction {
    pub stage_one_retain: f64,
    pub stage_two_retain: f64,
}

impl Default for StageReduction {
    fn default() -> Self {
        Self {
            stage_one_retain: 0.9,
            stage_two_retain: 0.5,
        }
    }
}

impl StageReduction {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (stage, value) in [(1, self.stage_one_retain), (2, self.stage_two_retain)] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::InvalidRetainFactor { stage, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlertSettings {
    pub disabled: bool,
    /// Minimum gap between two alerts for the same group and dimension.
    /// Zero lets every cycle alert.
    pub dispatch_frequency: Duration,
}

/// One managed group as reported by the group source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub id: String,
    pub minimum_instances: u32,
    pub maximum_instances: u32,
    pub profile: String,
    /// Queue whose name prefixes this group's staging queues
    pub target_queue: Option<String>,
}

impl GroupSpec {
    pub fn new(id: impl Into<String>, maximum_instances: u32) -> Self {
        Self {
            id: id.into(),
            minimum_instances: 0,
            maximum_instances,
            profile: DEFAULT_PROFILE.to_string(),
            target_queue: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalePolicy {
    pub dimensions: BTreeMap<Dimension, DimensionPolicy>,
    pub shutdown_thresholds: ShutdownThresholds,
    pub reduction: StageReduction,
    pub alerting: AlertSettings,
    pub profiles: HashMap<String, BacklogProfile>,
    pub staging_queue_indicator: Option<String>,
}

impl Default for AutoscalePolicy {
    fn default() -> Self {
        let dimensions = BTreeMap::from([
            (
                Dimension::Cpu,
                DimensionPolicy::new(StageThresholdSet::rising(70.0, 80.0, 90.0))
                    .with_alert_threshold(70.0),
            ),
            (
                Dimension::Memory,
                DimensionPolicy::new(StageThresholdSet::rising(70.0, 80.0, 90.0))
                    .with_alert_threshold(70.0),
            ),
            (
                Dimension::Disk,
                DimensionPolicy::new(StageThresholdSet::falling(1000.0, 500.0, 100.0))
                    .with_alert_threshold(1000.0),
            ),
        ]);

        Self {
            dimensions,
            shutdown_thresholds: ShutdownThresholds::default(),
            reduction: StageReduction::default(),
            alerting: AlertSettings::default(),
            profiles: HashMap::from([(DEFAULT_PROFILE.to_string(), BacklogProfile::default())]),
            staging_queue_indicator: None,
        }
    }
}

impl AutoscalePolicy {
    /// Check every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (dimension, policy) in &self.dimensions {
            policy.thresholds.validate(*dimension)?;
        }
        self.shutdown_thresholds.validate()?;
        self.reduction.validate()?;

        if !self.profiles.contains_key(DEFAULT_PROFILE) {
            return Err(ConfigError::ProfileNotFound {
                profile: DEFAULT_PROFILE.to_string(),
            });
        }
        for (name, profile) in &self.profiles {
            profile.validate(name)?;
        }

        if let Some(indicator) = &self.staging_queue_indicator {
            StagingQueueFilter::new("validation", indicator)?;
        }

        Ok(())
    }

    pub fn validate_groups(&self, groups: &[GroupSpec]) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for group in groups {
            if !seen.insert(group.id.as_str()) {
                return Err(ConfigError::DuplicateGroup {
                    group: group.id.clone(),
                });
            }
            self.validate_group(group)?;
        }
        Ok(())
    }

    pub fn validate_group(&self, group: &GroupSpec) -> Result<(), ConfigError> {
        if group.minimum_instances > group.maximum_instances {
            return Err(ConfigError::InvalidInstanceBounds {
                group: group.id.clone(),
                minimum: group.minimum_instances,
                maximum: group.maximum_instances,
            });
        }
        self.profile_for(group)?;
        Ok(())
    }

    /// Profile named by the group, falling back to the default profile.
    pub fn profile_for(&self, group: &GroupSpec) -> Result<&BacklogProfile, ConfigError> {
        self.profiles
            .get(&group.profile)
            .or_else(|| self.profiles.get(DEFAULT_PROFILE))
            .ok_or_else(|| ConfigError::ProfileNotFound {
                profile: group.profile.clone(),
            })
    }

    pub fn staging_filter_for(
        &self,
        group: &GroupSpec,
    ) -> Result<Option<StagingQueueFilter>, ConfigError> {
        match (&self.staging_queue_indicator, &group.target_queue) {
            (Some(indicator), Some(target)) => {
                StagingQueueFilter::new(target, indicator).map(Some)
            }
            _ => Ok(None),
        }
    }
}
