//! Policy file loading and environment override tests

use autoscale_core::{ConfigError, Dimension};
use fleet_autoscaler::load_policy;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn policy_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn clear_overrides() {
    for key in [
        "FLEET_AUTOSCALER_MEMORY_LIMIT_STAGE_1",
        "FLEET_AUTOSCALER_STAGE_3_SHUTDOWN_THRESHOLD",
        "FLEET_AUTOSCALER_SCALING_DELAY",
        "FLEET_AUTOSCALER_STAGING_QUEUE_INDICATOR",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_loads_shipped_policy() {
    clear_overrides();
    let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/policy.yaml");

    let loaded = load_policy(&shipped).unwrap();

    assert_eq!(loaded.groups.len(), 2);
    assert_eq!(loaded.groups[0].maximum_instances, 20);
    assert_eq!(loaded.groups[1].maximum_instances, 100);
    assert_eq!(loaded.policy.staging_queue_indicator.as_deref(), Some("»"));
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_overrides();
    let file = policy_file(
        r#"
memoryLimitOne: 70
resourceLimitThreeShutdownThreshold: 5
scalingDelay: 10
"#,
    );

    // Given: overrides for a stage limit, a shutdown threshold and the delay
    env::set_var("FLEET_AUTOSCALER_MEMORY_LIMIT_STAGE_1", "65");
    env::set_var("FLEET_AUTOSCALER_STAGE_3_SHUTDOWN_THRESHOLD", "2");
    env::set_var("FLEET_AUTOSCALER_SCALING_DELAY", "45");

    // When: loading the policy
    let loaded = load_policy(file.path());
    clear_overrides();
    let loaded = loaded.unwrap();

    // Then: environment values win
    let memory = &loaded.policy.dimensions[&Dimension::Memory];
    assert_eq!(memory.thresholds.stage_one, 65.0);
    assert_eq!(loaded.policy.shutdown_thresholds.stage_three, 2);
    assert_eq!(
        loaded.policy.profiles["default"].scaling_delay.as_secs(),
        45
    );
}

#[test]
#[serial]
fn test_invalid_env_value_is_reported() {
    clear_overrides();
    let file = policy_file("memoryLimitOne: 70\n");

    env::set_var("FLEET_AUTOSCALER_STAGE_3_SHUTDOWN_THRESHOLD", "five");
    let result = load_policy(file.path());
    clear_overrides();

    let err = result.unwrap_err();
    assert!(
        format!("{err:#}").contains("FLEET_AUTOSCALER_STAGE_3_SHUTDOWN_THRESHOLD"),
        "unexpected error: {err:#}"
    );
}

#[test]
#[serial]
fn test_negative_delay_from_env_rejected() {
    clear_overrides();
    let file = policy_file("");

    env::set_var("FLEET_AUTOSCALER_SCALING_DELAY", "-1");
    let result = load_policy(file.path());
    clear_overrides();

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::NegativeScalingDelay { seconds: -1, .. })
    ));
}

#[test]
#[serial]
fn test_zero_shutdown_threshold_rejected() {
    clear_overrides();
    let file = policy_file("resourceLimitTwoShutdownThreshold: 0\n");

    let err = load_policy(file.path()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::InvalidShutdownThreshold { stage: 2 })
    );
}

#[test]
#[serial]
fn test_missing_file_is_reported() {
    let err = load_policy(Path::new("/nonexistent/policy.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read policy file"));
}
