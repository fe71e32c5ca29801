//! Fleet Autoscaler binary - runs one evaluation loop per managed group

use anyhow::Context;
use fleet_autoscaler::{build_supervisor, load_policy, Config};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_config();
    init_tracing(config.log_json);

    info!("Starting Fleet Autoscaler");
    info!("Configuration:");
    info!("  Policy: {}", config.policy_path.display());
    info!("  Metrics endpoint: {}", config.metrics_endpoint);
    info!("  Dry-run: {}", config.dry_run);
    info!("  Poll interval: {}", config.poll_interval);
    info!("  Discovery interval: {}", config.discovery_interval);

    let loaded = load_policy(&config.policy_path)?;
    if loaded.groups.is_empty() {
        warn!("Policy lists no groups; nothing will be scaled");
    }
    let supervisor = build_supervisor(&config, loaded)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt");
            let _ = shutdown_tx.send(true);
        }
    });

    match supervisor.run(shutdown_rx).await {
        Ok(()) => {
            info!("Fleet autoscaler exited normally");
            Ok(())
        }
        Err(e) => {
            error!("Fleet autoscaler stopped: {}", e);
            Err(e).context("Fleet stopped on a fatal error")
        }
    }
}
