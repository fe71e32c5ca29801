//! Alert dispatch
//!
//! Alerts are informational: they never block or alter a scaling decision.

use crate::model::{Dimension, Stage};
use crate::policy::AlertSettings;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A breached alert threshold for one dimension of one group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotice {
    pub group_id: String,
    pub dimension: Dimension,
    pub stage: Stage,
    pub value: f64,
}

/// Alert transport - implement this to deliver notices to operators
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn notify(&self, notice: &AlertNotice) -> Result<()>;
}

/// Per-group alert gate applying the disable switch and dispatch frequency
pub struct Alerter {
    dispatcher: Arc<dyn AlertDispatcher>,
    settings: AlertSettings,
    last_sent: HashMap<Dimension, DateTime<Utc>>,
}

impl Alerter {
    pub fn new(dispatcher: Arc<dyn AlertDispatcher>, settings: AlertSettings) -> Self {
        Self {
            dispatcher,
            settings,
            last_sent: HashMap::new(),
        }
    }

    /// Send `notice` unless alerting is disabled or the dimension alerted too
    /// recently. Returns whether the notice was delivered.
    pub async fn dispatch(&mut self, notice: AlertNotice, now: DateTime<Utc>) -> bool {
        if self.settings.disabled {
            return false;
        }

        if let Some(last) = self.last_sent.get(&notice.dimension) {
            let throttled = match (now - *last).to_std() {
                Ok(elapsed) => elapsed < self.settings.dispatch_frequency,
                Err(_) => !self.settings.dispatch_frequency.is_zero(),
            };
            if throttled {
                debug!(
                    group = %notice.group_id,
                    dimension = %notice.dimension,
                    "Alert throttled by dispatch frequency"
                );
                return false;
            }
        }

        match self.dispatcher.notify(&notice).await {
            Ok(()) => {
                self.last_sent.insert(notice.dimension, now);
                true
            }
            Err(e) => {
                warn!(
                    group = %notice.group_id,
                    dimension = %notice.dimension,
                    error = %e,
                    "Failed to dispatch alert"
                );
                false
            }
        }
    }
}
