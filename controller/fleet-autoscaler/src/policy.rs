//! Policy file loading
//!
//! Reads the YAML policy, accepts the legacy key spellings
//! (`resourceLimitOne`, `memoryUsedPercentLimitStageOne`, `diskFreeMbLimitStageOne`, ...),
//! applies `FLEET_AUTOSCALER_*` environment overrides and produces the
//! normalized [`AutoscalePolicy`] plus the configured groups.

use anyhow::{Context, Result};
use autoscale_core::policy::DEFAULT_PROFILE;
use autoscale_core::{
    AutoscalePolicy, BacklogProfile, ConfigError, Dimension, DimensionPolicy, GroupSpec,
    StageThresholdSet,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

const ENV_PREFIX: &str = "FLEET_AUTOSCALER";
const DEFAULT_MAXIMUM_INSTANCES: u32 = 100;

/// Policy file as written by operators
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyFile {
    pub cpu_limit_one: Option<f64>,
    pub cpu_limit_two: Option<f64>,
    pub cpu_limit_three: Option<f64>,
    pub cpu_alert_dispatch_threshold: Option<f64>,

    #[serde(alias = "resourceLimitOne", alias = "memoryUsedPercentLimitStageOne")]
    pub memory_limit_one: Option<f64>,
    #[serde(alias = "resourceLimitTwo", alias = "memoryUsedPercentLimitStageTwo")]
    pub memory_limit_two: Option<f64>,
    #[serde(alias = "resourceLimitThree", alias = "memoryUsedPercentLimitStageThree")]
    pub memory_limit_three: Option<f64>,
    #[serde(
        alias = "alertDispatchThreshold",
        alias = "memoryUsedPercentAlertDispatchThreshold"
    )]
    pub memory_alert_dispatch_threshold: Option<f64>,

    #[serde(alias = "diskFreeMbLimitStageOne")]
    pub disk_limit_one: Option<f64>,
    #[serde(alias = "diskFreeMbLimitStageTwo")]
    pub disk_limit_two: Option<f64>,
    #[serde(alias = "diskFreeMbLimitStageThree")]
    pub disk_limit_three: Option<f64>,
    #[serde(alias = "diskFreeMbAlertDispatchThreshold")]
    pub disk_alert_dispatch_threshold: Option<f64>,

    #[serde(alias = "stageOneShutdownThreshold")]
    pub resource_limit_one_shutdown_threshold: Option<u32>,
    #[serde(alias = "stageTwoShutdownThreshold")]
    pub resource_limit_two_shutdown_threshold: Option<u32>,
    #[serde(alias = "stageThreeShutdownThreshold")]
    pub resource_limit_three_shutdown_threshold: Option<u32>,

    pub stage_one_retain: Option<f64>,
    pub stage_two_retain: Option<f64>,

    /// Minutes between alerts for the same group and dimension
    pub alert_dispatch_frequency: Option<u64>,
    pub disable_alert_dispatch: bool,

    pub staging_queue_indicator: Option<String>,

    /// Seconds; applies to the default profile
    pub scaling_delay: Option<i64>,
    /// Applies to the default profile
    pub backlog_goal: Option<u64>,
    pub profiles: HashMap<String, ProfileFile>,

    /// Cap for groups that do not set their own
    pub maximum_instances: Option<u32>,
    pub groups: Vec<GroupFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileFile {
    pub scaling_delay: Option<i64>,
    pub backlog_goal: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupFile {
    pub id: String,
    pub minimum_instances: Option<u32>,
    pub maximum_instances: Option<u32>,
    pub profile: Option<String>,
    pub target_queue: Option<String>,
}

/// Normalized result of loading a policy file
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy: AutoscalePolicy,
    pub groups: Vec<GroupSpec>,
}

/// Load, override from the environment, normalize and validate.
#[instrument]
pub fn load_policy(path: &Path) -> Result<LoadedPolicy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    let mut file = parse_policy(&raw)
        .with_context(|| format!("Failed to parse policy file {}", path.display()))?;

    apply_env_overrides(&mut file)?;
    let loaded = file.into_policy()?;

    info!(
        groups = loaded.groups.len(),
        profiles = loaded.policy.profiles.len(),
        "Loaded autoscale policy"
    );
    Ok(loaded)
}

pub fn parse_policy(raw: &str) -> Result<PolicyFile> {
    if raw.trim().is_empty() {
        return Ok(PolicyFile::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}_{name}");
    match env::var(&key) {
        Ok(value) => {
            debug!(variable = %key, "Applying environment override");
            let parsed = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {key}: {value}"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

fn override_field<T>(field: &mut Option<T>, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = env_override(name)? {
        *field = Some(value);
    }
    Ok(())
}

/// Environment variables win over file values.
pub fn apply_env_overrides(file: &mut PolicyFile) -> Result<()> {
    override_field(&mut file.cpu_limit_one, "CPU_LIMIT_STAGE_1")?;
    override_field(&mut file.cpu_limit_two, "CPU_LIMIT_STAGE_2")?;
    override_field(&mut file.cpu_limit_three, "CPU_LIMIT_STAGE_3")?;
    override_field(&mut file.cpu_alert_dispatch_threshold, "CPU_ALERT_DISPATCH_THRESHOLD")?;

    override_field(&mut file.memory_limit_one, "MEMORY_LIMIT_STAGE_1")?;
    override_field(&mut file.memory_limit_two, "MEMORY_LIMIT_STAGE_2")?;
    override_field(&mut file.memory_limit_three, "MEMORY_LIMIT_STAGE_3")?;
    override_field(
        &mut file.memory_alert_dispatch_threshold,
        "MEMORY_ALERT_DISPATCH_THRESHOLD",
    )?;

    override_field(&mut file.disk_limit_one, "DISK_LIMIT_STAGE_1")?;
    override_field(&mut file.disk_limit_two, "DISK_LIMIT_STAGE_2")?;
    override_field(&mut file.disk_limit_three, "DISK_LIMIT_STAGE_3")?;
    override_field(&mut file.disk_alert_dispatch_threshold, "DISK_ALERT_DISPATCH_THRESHOLD")?;

    override_field(
        &mut file.resource_limit_one_shutdown_threshold,
        "STAGE_1_SHUTDOWN_THRESHOLD",
    )?;
    override_field(
        &mut file.resource_limit_two_shutdown_threshold,
        "STAGE_2_SHUTDOWN_THRESHOLD",
    )?;
    override_field(
        &mut file.resource_limit_three_shutdown_threshold,
        "STAGE_3_SHUTDOWN_THRESHOLD",
    )?;

    override_field(&mut file.scaling_delay, "SCALING_DELAY")?;
    override_field(&mut file.backlog_goal, "BACKLOG_GOAL")?;
    override_field(&mut file.maximum_instances, "MAXIMUM_INSTANCES")?;
    override_field(&mut file.staging_queue_indicator, "STAGING_QUEUE_INDICATOR")?;

    Ok(())
}

fn stage_limits(
    defaults: &DimensionPolicy,
    one: Option<f64>,
    two: Option<f64>,
    three: Option<f64>,
    alert: Option<f64>,
) -> DimensionPolicy {
    let thresholds = StageThresholdSet {
        stage_one: one.unwrap_or(defaults.thresholds.stage_one),
        stage_two: two.unwrap_or(defaults.thresholds.stage_two),
        stage_three: three.unwrap_or(defaults.thresholds.stage_three),
        ..defaults.thresholds.clone()
    };
    // Without an explicit alert threshold, alerting starts at stage one
    let alert = alert.unwrap_or(thresholds.stage_one);
    DimensionPolicy::new(thresholds).with_alert_threshold(alert)
}

fn backlog_profile(
    name: &str,
    scaling_delay: Option<i64>,
    backlog_goal: Option<u64>,
) -> Result<BacklogProfile, ConfigError> {
    let defaults = BacklogProfile::default();
    let scaling_delay = match scaling_delay {
        Some(seconds) if seconds < 0 => {
            return Err(ConfigError::NegativeScalingDelay {
                profile: name.to_string(),
                seconds,
            })
        }
        Some(seconds) => Duration::from_secs(seconds.unsigned_abs()),
        None => defaults.scaling_delay,
    };

    Ok(BacklogProfile {
        scaling_delay,
        backlog_goal: backlog_goal.unwrap_or(defaults.backlog_goal),
    })
}

impl PolicyFile {
    /// Build the normalized policy and validate it with the groups.
    pub fn into_policy(self) -> Result<LoadedPolicy, ConfigError> {
        let mut policy = AutoscalePolicy::default();

        let overrides = [
            (
                Dimension::Cpu,
                [self.cpu_limit_one, self.cpu_limit_two, self.cpu_limit_three],
                self.cpu_alert_dispatch_threshold,
            ),
            (
                Dimension::Memory,
                [
                    self.memory_limit_one,
                    self.memory_limit_two,
                    self.memory_limit_three,
                ],
                self.memory_alert_dispatch_threshold,
            ),
            (
                Dimension::Disk,
                [self.disk_limit_one, self.disk_limit_two, self.disk_limit_three],
                self.disk_alert_dispatch_threshold,
            ),
        ];
        for (dimension, [one, two, three], alert) in overrides {
            if let Some(defaults) = policy.dimensions.get(&dimension) {
                let updated = stage_limits(defaults, one, two, three, alert);
                policy.dimensions.insert(dimension, updated);
            }
        }

        let thresholds = &mut policy.shutdown_thresholds;
        if let Some(v) = self.resource_limit_one_shutdown_threshold {
            thresholds.stage_one = v;
        }
        if let Some(v) = self.resource_limit_two_shutdown_threshold {
            thresholds.stage_two = v;
        }
        if let Some(v) = self.resource_limit_three_shutdown_threshold {
            thresholds.stage_three = v;
        }

        if let Some(v) = self.stage_one_retain {
            policy.reduction.stage_one_retain = v;
        }
        if let Some(v) = self.stage_two_retain {
            policy.reduction.stage_two_retain = v;
        }

        policy.alerting.disabled = self.disable_alert_dispatch;
        policy.alerting.dispatch_frequency =
            Duration::from_secs(self.alert_dispatch_frequency.unwrap_or(0) * 60);
        policy.staging_queue_indicator = self.staging_queue_indicator.filter(|s| !s.is_empty());

        policy.profiles.insert(
            DEFAULT_PROFILE.to_string(),
            backlog_profile(DEFAULT_PROFILE, self.scaling_delay, self.backlog_goal)?,
        );
        for (name, profile) in &self.profiles {
            let base = if name == DEFAULT_PROFILE {
                (
                    profile.scaling_delay.or(self.scaling_delay),
                    profile.backlog_goal.or(self.backlog_goal),
                )
            } else {
                (profile.scaling_delay, profile.backlog_goal)
            };
            policy
                .profiles
                .insert(name.clone(), backlog_profile(name, base.0, base.1)?);
        }

        let default_maximum = self.maximum_instances.unwrap_or(DEFAULT_MAXIMUM_INSTANCES);
        let groups: Vec<GroupSpec> = self
            .groups
            .into_iter()
            .map(|g| GroupSpec {
                minimum_instances: g.minimum_instances.unwrap_or(0),
                maximum_instances: g.maximum_instances.unwrap_or(default_maximum),
                profile: g.profile.unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
                target_queue: g.target_queue,
                id: g.id,
            })
            .collect();

        policy.validate()?;
        policy.validate_groups(&groups)?;

        Ok(LoadedPolicy { policy, groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_core::ThresholdDirection;

    #[test]
    fn test_empty_file_yields_defaults() {
        let loaded = parse_policy("").unwrap().into_policy().unwrap();
        assert_eq!(loaded.policy, AutoscalePolicy::default());
        assert!(loaded.groups.is_empty());
    }

    #[test]
    fn test_legacy_memory_keys() {
        let raw = r#"
resourceLimitOne: 60
memoryUsedPercentLimitStageTwo: 75
memoryLimitThree: 85
resourceLimitThreeShutdownThreshold: 2
"#;
        let loaded = parse_policy(raw).unwrap().into_policy().unwrap();
        let memory = &loaded.policy.dimensions[&Dimension::Memory];
        assert_eq!(memory.thresholds.stage_one, 60.0);
        assert_eq!(memory.thresholds.stage_two, 75.0);
        assert_eq!(memory.thresholds.stage_three, 85.0);
        // Alerting follows the new stage one limit
        assert_eq!(memory.alert_dispatch_threshold, Some(60.0));
        assert_eq!(loaded.policy.shutdown_thresholds.stage_three, 2);
    }

    #[test]
    fn test_disk_keys_keep_falling_direction() {
        let raw = r#"
diskFreeMbLimitStageOne: 2000
diskFreeMbLimitStageTwo: 800
diskFreeMbLimitStageThree: 200
diskAlertDispatchThreshold: 2500
"#;
        let loaded = parse_policy(raw).unwrap().into_policy().unwrap();
        let disk = &loaded.policy.dimensions[&Dimension::Disk];
        assert_eq!(disk.thresholds.direction, ThresholdDirection::Falling);
        assert_eq!(disk.thresholds.stage_one, 2000.0);
        assert_eq!(disk.alert_dispatch_threshold, Some(2500.0));
    }

    #[test]
    fn test_non_monotonic_limits_rejected() {
        let raw = "cpuLimitOne: 95\n";
        let err = parse_policy(raw).unwrap().into_policy().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonMonotonicThresholds {
                dimension: Dimension::Cpu,
                ..
            }
        ));
    }

    #[test]
    fn test_negative_scaling_delay_rejected() {
        let raw = r#"
profiles:
  batch:
    scalingDelay: -5
"#;
        let err = parse_policy(raw).unwrap().into_policy().unwrap_err();
        assert_eq!(
            err,
            ConfigError::NegativeScalingDelay {
                profile: "batch".to_string(),
                seconds: -5
            }
        );
    }

    #[test]
    fn test_groups_and_profiles() {
        let raw = r#"
scalingDelay: 30
backlogGoal: 100
maximumInstances: 8
alertDispatchFrequency: 15
profiles:
  batch:
    backlogGoal: 1000
groups:
  - id: ingest
    targetQueue: dataprocessing-in
  - id: batch
    minimumInstances: 1
    maximumInstances: 20
    profile: batch
"#;
        let loaded = parse_policy(raw).unwrap().into_policy().unwrap();

        let default = &loaded.policy.profiles[DEFAULT_PROFILE];
        assert_eq!(default.scaling_delay, Duration::from_secs(30));
        assert_eq!(default.backlog_goal, 100);

        let batch = &loaded.policy.profiles["batch"];
        assert_eq!(batch.backlog_goal, 1000);
        assert_eq!(batch.scaling_delay, Duration::from_secs(10));

        assert_eq!(loaded.groups[0].maximum_instances, 8);
        assert_eq!(
            loaded.groups[0].target_queue.as_deref(),
            Some("dataprocessing-in")
        );
        assert_eq!(loaded.groups[1].minimum_instances, 1);
        assert_eq!(loaded.groups[1].profile, "batch");
        assert_eq!(
            loaded.policy.alerting.dispatch_frequency,
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let raw = r#"
groups:
  - id: ingest
  - id: ingest
"#;
        let err = parse_policy(raw).unwrap().into_policy().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateGroup { .. }));
    }

    #[test]
    fn test_unknown_group_profile_falls_back() {
        let raw = r#"
groups:
  - id: ingest
    profile: missing
"#;
        assert!(parse_policy(raw).unwrap().into_policy().is_ok());
    }
}
