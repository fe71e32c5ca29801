//! Supervisor assembly from process configuration and policy

use crate::alerts::LogAlertDispatcher;
use crate::config::Config;
use crate::metrics::HttpMetricSource;
use crate::orchestrator::{HttpOrchestrator, LogOnlyOrchestrator};
use crate::policy::LoadedPolicy;
use anyhow::{Context, Result};
use autoscale_core::{
    Collaborators, FleetSupervisor, MetricSource, Orchestrator, StaticGroupSource,
    ThrottledMetricSource,
};
use std::sync::Arc;
use tracing::info;

/// Build the fleet supervisor with adapters chosen by `config`.
pub fn build_supervisor(config: &Config, loaded: LoadedPolicy) -> Result<FleetSupervisor> {
    let http_metrics =
        HttpMetricSource::new(config.metrics_endpoint.clone(), config.request_timeout_secs)?;
    let metrics: Arc<dyn MetricSource> = match config.metrics_refresh() {
        Some(refresh) => {
            info!(
                refresh_ms = refresh.as_millis(),
                "Caching resource readings between refreshes"
            );
            Arc::new(ThrottledMetricSource::new(http_metrics, refresh))
        }
        None => Arc::new(http_metrics),
    };

    let orchestrator: Arc<dyn Orchestrator> = match &config.orchestrator_endpoint {
        Some(endpoint) if config.has_orchestrator_endpoint() => {
            info!(endpoint = %endpoint, "Using HTTP orchestrator");
            Arc::new(HttpOrchestrator::new(
                endpoint.clone(),
                config.request_timeout_secs,
                config.max_retry_attempts,
                config.retry_backoff_ms,
            )?)
        }
        _ => {
            info!("Using log-only orchestrator (dry-run mode)");
            Arc::new(LogOnlyOrchestrator::new(&loaded.groups))
        }
    };

    let collaborators = Collaborators {
        metrics,
        orchestrator,
        alerts: Arc::new(LogAlertDispatcher),
    };

    FleetSupervisor::new(
        loaded.policy,
        Arc::new(StaticGroupSource::new(loaded.groups)),
        collaborators,
        config.scheduler_settings(),
    )
    .context("Invalid autoscale policy")
}
