//! Process configuration for the fleet autoscaler service

use autoscale_core::SchedulerSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the fleet autoscaler
#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-autoscaler")]
#[command(about = "Scales container groups from resource pressure and queue backlog")]
pub struct Config {
    /// Path to the autoscale policy file (YAML)
    #[arg(long, env = "FLEET_AUTOSCALER_POLICY", default_value = "config/policy.yaml")]
    pub policy_path: PathBuf,

    /// Orchestrator base URL (groups API)
    #[arg(long, env)]
    pub orchestrator_endpoint: Option<String>,

    /// Metrics base URL (resource readings and queue depths)
    #[arg(long, env, default_value = "http://localhost:9100")]
    pub metrics_endpoint: String,

    /// Dry-run mode (log decisions, never call the orchestrator)
    #[arg(long, env)]
    pub dry_run: bool,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,

    /// Interval between evaluation cycles of a group
    #[arg(long, env, default_value = "30s")]
    pub poll_interval: humantime::Duration,

    /// Interval between group discovery passes
    #[arg(long, env, default_value = "60s")]
    pub discovery_interval: humantime::Duration,

    /// Upper bound on each metric source call
    #[arg(long, env, default_value = "5s")]
    pub source_timeout: humantime::Duration,

    /// Reuse resource readings for this long before querying again
    #[arg(long, env)]
    pub metrics_refresh_interval: Option<humantime::Duration>,

    /// HTTP request timeout in seconds
    #[arg(long, env, default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Maximum retry attempts for failed orchestrator calls
    #[arg(long, env, default_value_t = 3)]
    pub max_retry_attempts: u32,

    /// Backoff retry delay in milliseconds
    #[arg(long, env, default_value_t = 1000)]
    pub retry_backoff_ms: u64,
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    /// Check if decisions should reach a real orchestrator
    pub fn has_orchestrator_endpoint(&self) -> bool {
        self.orchestrator_endpoint.is_some() && !self.dry_run
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: self.poll_interval.into(),
            discovery_interval: self.discovery_interval.into(),
            source_timeout: self.source_timeout.into(),
        }
    }

    pub fn metrics_refresh(&self) -> Option<Duration> {
        self.metrics_refresh_interval
            .map(Duration::from)
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_args() {
        let config = Config::try_parse_from(["fleet-autoscaler"]).unwrap();

        assert!(!config.dry_run);
        assert_eq!(config.policy_path, PathBuf::from("config/policy.yaml"));
        let settings = config.scheduler_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.discovery_interval, Duration::from_secs(60));
        assert_eq!(settings.source_timeout, Duration::from_secs(5));
        assert!(config.metrics_refresh().is_none());
    }

    #[test]
    fn test_humantime_intervals() {
        let config = Config::try_parse_from([
            "fleet-autoscaler",
            "--poll-interval",
            "1m 30s",
            "--metrics-refresh-interval",
            "2m",
        ])
        .unwrap();

        assert_eq!(
            config.scheduler_settings().poll_interval,
            Duration::from_secs(90)
        );
        assert_eq!(config.metrics_refresh(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_has_orchestrator_endpoint() {
        let mut config = Config::try_parse_from([
            "fleet-autoscaler",
            "--orchestrator-endpoint",
            "http://swarm:2375",
            "--dry-run",
        ])
        .unwrap();

        // Dry-run mode disables the orchestrator
        assert!(!config.has_orchestrator_endpoint());

        config.dry_run = false;
        assert!(config.has_orchestrator_endpoint());

        config.orchestrator_endpoint = None;
        assert!(!config.has_orchestrator_endpoint());
    }
}
