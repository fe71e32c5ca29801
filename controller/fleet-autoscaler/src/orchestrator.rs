//! Orchestrator adapters
//!
//! The log-only adapter simulates a backend for dry runs. The HTTP adapter
//! talks to a groups API and retries failed scale calls with exponential
//! backoff.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use autoscale_core::{GroupSpec, Orchestrator, OrchestratorError, ScalingDecision};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Log-only orchestrator (dry-run mode)
///
/// Keeps simulated instance counts so the engine sees its own decisions take
/// effect. Groups start at their minimum instance count.
pub struct LogOnlyOrchestrator {
    counts: Mutex<HashMap<String, u32>>,
}

impl LogOnlyOrchestrator {
    pub fn new(groups: &[GroupSpec]) -> Self {
        let counts = groups
            .iter()
            .map(|g| (g.id.clone(), g.minimum_instances))
            .collect();
        Self {
            counts: Mutex::new(counts),
        }
    }
}

#[async_trait]
impl Orchestrator for LogOnlyOrchestrator {
    async fn apply_decision(&self, decision: &ScalingDecision) -> Result<(), OrchestratorError> {
        info!(
            group = %decision.group_id,
            decision_id = %decision.id,
            current = decision.current_count,
            target = decision.target_count,
            reason = %decision.reason,
            "Scaling decision (log-only mode)"
        );
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(decision.group_id.clone(), decision.target_count);
        Ok(())
    }

    async fn current_count(&self, group_id: &str) -> Result<u32, OrchestratorError> {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_id)
            .copied()
            .ok_or_else(|| OrchestratorError::GroupNotFound {
                group: group_id.to_string(),
            })
    }
}

/// HTTP orchestrator - reads and sets instance counts through a groups API
pub struct HttpOrchestrator {
    endpoint: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff_ms: u64,
}

/// Payload sent to the scale endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScaleRequest<'a> {
    decision_id: String,
    group_id: &'a str,
    target_count: u32,
    reason: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct GroupStatus {
    instances: u32,
}

enum Attempt {
    Done,
    GroupNotFound,
    Failed(anyhow::Error),
}

impl HttpOrchestrator {
    /// Create a new HTTP orchestrator client
    pub fn new(
        endpoint: String,
        timeout_secs: u64,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            max_retries,
            retry_backoff_ms,
        })
    }

    /// Delay before retry `attempt` (1-based), doubling each time and saturating.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    fn group_url(&self, group_id: &str) -> String {
        format!("{}/groups/{}", self.endpoint, group_id)
    }

    async fn put_scale(&self, url: &str, request: &ScaleRequest<'_>) -> Attempt {
        match self.client.put(url).json(request).send().await {
            Ok(response) if response.status().is_success() => Attempt::Done,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => Attempt::GroupNotFound,
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unable to read body>".to_string());
                Attempt::Failed(anyhow!(
                    "Scale API returned error status {}: {}",
                    status,
                    body
                ))
            }
            Err(e) => Attempt::Failed(anyhow!("HTTP request failed: {}", e)),
        }
    }

    async fn fetch_count(&self, group_id: &str) -> Result<Option<u32>> {
        let response = self
            .client
            .get(self.group_url(group_id))
            .send()
            .await
            .context("Group status request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("Group status request rejected")?;
        let status: GroupStatus = response
            .json()
            .await
            .context("Failed to decode group status")?;
        Ok(Some(status.instances))
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn apply_decision(&self, decision: &ScalingDecision) -> Result<(), OrchestratorError> {
        let url = format!("{}/scale", self.group_url(&decision.group_id));
        let request = ScaleRequest {
            decision_id: decision.id.to_string(),
            group_id: &decision.group_id,
            target_count: decision.target_count,
            reason: decision.reason.to_string(),
            timestamp: decision.timestamp.to_rfc3339(),
        };

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                warn!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis(),
                    decision_id = %decision.id,
                    "Retrying scale call after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.put_scale(&url, &request).await {
                Attempt::Done => {
                    info!(
                        group = %decision.group_id,
                        decision_id = %decision.id,
                        target = decision.target_count,
                        reason = %decision.reason,
                        attempt = attempt + 1,
                        "Applied scaling decision"
                    );
                    return Ok(());
                }
                Attempt::GroupNotFound => {
                    return Err(OrchestratorError::GroupNotFound {
                        group: decision.group_id.clone(),
                    })
                }
                Attempt::Failed(e) => last_error = Some(e),
            }
        }

        let error = last_error.unwrap_or_else(|| anyhow!("Scale API call failed"));
        Err(OrchestratorError::RequestFailed {
            message: format!("{:#}", error),
        })
    }

    async fn current_count(&self, group_id: &str) -> Result<u32, OrchestratorError> {
        match self.fetch_count(group_id).await {
            Ok(Some(count)) => Ok(count),
            Ok(None) => Err(OrchestratorError::GroupNotFound {
                group: group_id.to_string(),
            }),
            Err(e) => Err(OrchestratorError::RequestFailed {
                message: format!("{:#}", e),
            }),
        }
    }
}
