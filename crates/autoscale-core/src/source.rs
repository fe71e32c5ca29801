//! Metric and group source capabilities

use crate::backlog::QueueDepth;
use crate::error::SourceError;
use crate::model::{Dimension, ResourceSample};
use crate::policy::GroupSpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Provider of resource readings and queue backlog
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Latest reading, or `None` when the source has nothing for this cycle.
    async fn sample(
        &self,
        group_id: &str,
        dimension: Dimension,
    ) -> Result<Option<ResourceSample>, SourceError>;

    async fn queue_depths(&self, group_id: &str) -> Result<Vec<QueueDepth>, SourceError>;
}

/// Provider of the set of managed groups
#[async_trait]
pub trait GroupSource: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<GroupSpec>, SourceError>;
}

/// Fixed group list, typically from the policy file
#[derive(Debug, Clone, Default)]
pub struct StaticGroupSource {
    groups: Vec<GroupSpec>,
}

impl StaticGroupSource {
    pub fn new(groups: Vec<GroupSpec>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl GroupSource for StaticGroupSource {
    async fn list_groups(&self) -> Result<Vec<GroupSpec>, SourceError> {
        Ok(self.groups.clone())
    }
}

type CacheKey = (String, Dimension);

/// Caches resource readings for a refresh interval
///
/// Some sources are expensive to query (broker-wide memory and disk stats),
/// so readings are reused until `refresh_interval` has passed. Queue depths
/// are never cached since the staging filter compares them cycle to cycle.
pub struct ThrottledMetricSource<S> {
    inner: S,
    refresh_interval: Duration,
    cache: Mutex<HashMap<CacheKey, (Instant, Option<ResourceSample>)>>,
}

impl<S: MetricSource> ThrottledMetricSource<S> {
    pub fn new(inner: S, refresh_interval: Duration) -> Self {
        Self {
            inner,
            refresh_interval,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<Option<ResourceSample>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).and_then(|(fetched_at, sample)| {
            (fetched_at.elapsed() < self.refresh_interval).then(|| sample.clone())
        })
    }
}

#[async_trait]
impl<S: MetricSource> MetricSource for ThrottledMetricSource<S> {
    async fn sample(
        &self,
        group_id: &str,
        dimension: Dimension,
    ) -> Result<Option<ResourceSample>, SourceError> {
        let key = (group_id.to_string(), dimension);
        if let Some(sample) = self.cached(&key) {
            debug!(group = %group_id, dimension = %dimension, "Using cached reading");
            return Ok(sample);
        }

        let sample = self.inner.sample(group_id, dimension).await?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, (Instant::now(), sample.clone()));
        Ok(sample)
    }

    async fn queue_depths(&self, group_id: &str) -> Result<Vec<QueueDepth>, SourceError> {
        self.inner.queue_depths(group_id).await
    }
}
