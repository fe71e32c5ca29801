//! HTTP metric source
//!
//! Reads per-group resource readings and queue depths from a metrics API.
//! A 404 on a reading means the source has nothing for this cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use autoscale_core::{Dimension, MetricSource, QueueDepth, ResourceSample, SourceError};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct HttpMetricSource {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Reading {
    value: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl HttpMetricSource {
    pub fn new(endpoint: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("Metrics API rejected {url}"))?;
        let body = response
            .json()
            .await
            .with_context(|| format!("Failed to decode response from {url}"))?;
        Ok(Some(body))
    }
}

fn unavailable(e: anyhow::Error) -> SourceError {
    SourceError::Unavailable {
        message: format!("{:#}", e),
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn sample(
        &self,
        group_id: &str,
        dimension: Dimension,
    ) -> Result<Option<ResourceSample>, SourceError> {
        let url = format!(
            "{}/groups/{}/metrics/{}",
            self.endpoint,
            group_id,
            dimension.as_str()
        );
        let reading: Option<Reading> = self.get_json(&url).await.map_err(unavailable)?;

        Ok(reading.map(|r| {
            debug!(group = %group_id, dimension = %dimension, value = r.value, "Fetched reading");
            ResourceSample {
                dimension,
                value: r.value,
                timestamp: r.timestamp.unwrap_or_else(Utc::now),
            }
        }))
    }

    async fn queue_depths(&self, group_id: &str) -> Result<Vec<QueueDepth>, SourceError> {
        let url = format!("{}/groups/{}/queues", self.endpoint, group_id);
        let queues: Option<Vec<QueueDepth>> = self.get_json(&url).await.map_err(unavailable)?;
        Ok(queues.unwrap_or_default())
    }
}
