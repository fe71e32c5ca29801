//! Alert transport

use anyhow::Result;
use async_trait::async_trait;
use autoscale_core::{AlertDispatcher, AlertNotice};
use tracing::warn;

/// Writes alerts to the log at warn level
pub struct LogAlertDispatcher;

#[async_trait]
impl AlertDispatcher for LogAlertDispatcher {
    async fn notify(&self, notice: &AlertNotice) -> Result<()> {
        warn!(
            group = %notice.group_id,
            dimension = %notice.dimension,
            stage = %notice.stage,
            value = notice.value,
            "Resource alert threshold breached"
        );
        Ok(())
    }
}
