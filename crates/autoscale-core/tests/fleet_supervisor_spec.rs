//! Fleet supervisor tests
//!
//! Tests cover:
//! - Policy validation at construction
//! - Reconciling workers against the group source
//! - Removing groups the orchestrator no longer knows and resuming them
//! - Restarting a worker without overlapping cycles
//! - Stopping on a fatal shutdown failure and on an external signal

use anyhow::Result;
use async_trait::async_trait;
use autoscale_core::{
    AlertDispatcher, AlertNotice, AutoscalePolicy, Collaborators, ConfigError, CycleError,
    Dimension, FleetSupervisor, GroupSource, GroupSpec, MetricSource, Orchestrator,
    OrchestratorError, QueueDepth, ResourceSample, ScalingDecision, SchedulerSettings,
    SourceError, StageThresholdSet,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct ListedGroups {
    groups: Mutex<Vec<GroupSpec>>,
}

impl ListedGroups {
    fn set(&self, groups: Vec<GroupSpec>) {
        *self.groups.lock().unwrap() = groups;
    }
}

#[async_trait]
impl GroupSource for ListedGroups {
    async fn list_groups(&self) -> Result<Vec<GroupSpec>, SourceError> {
        Ok(self.groups.lock().unwrap().clone())
    }
}

/// Constant memory reading for every group
struct ConstantMemory(Option<f64>);

#[async_trait]
impl MetricSource for ConstantMemory {
    async fn sample(
        &self,
        _group_id: &str,
        dimension: Dimension,
    ) -> Result<Option<ResourceSample>, SourceError> {
        Ok(self
            .0
            .filter(|_| dimension == Dimension::Memory)
            .map(|v| ResourceSample::new(dimension, v)))
    }

    async fn queue_depths(&self, _group_id: &str) -> Result<Vec<QueueDepth>, SourceError> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct CountingOrchestrator {
    known: Mutex<HashMap<String, u32>>,
    count_calls: Mutex<HashMap<String, u32>>,
    fail_apply: bool,
    apply_delay: Option<Duration>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

/// Counts an apply call as in flight until it finishes or is dropped
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32, max: &AtomicU32) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CountingOrchestrator {
    fn knowing(groups: &[(&str, u32)]) -> Self {
        let orchestrator = Self::default();
        for (id, count) in groups {
            orchestrator
                .known
                .lock()
                .unwrap()
                .insert(id.to_string(), *count);
        }
        orchestrator
    }

    fn learn(&self, group: &str, count: u32) {
        self.known.lock().unwrap().insert(group.to_string(), count);
    }

    fn calls(&self, group: &str) -> u32 {
        self.count_calls
            .lock()
            .unwrap()
            .get(group)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Orchestrator for CountingOrchestrator {
    async fn apply_decision(&self, decision: &ScalingDecision) -> Result<(), OrchestratorError> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_apply {
            return Err(OrchestratorError::RequestFailed {
                message: "connection refused".to_string(),
            });
        }
        self.known
            .lock()
            .unwrap()
            .insert(decision.group_id.clone(), decision.target_count);
        Ok(())
    }

    async fn current_count(&self, group_id: &str) -> Result<u32, OrchestratorError> {
        *self
            .count_calls
            .lock()
            .unwrap()
            .entry(group_id.to_string())
            .or_insert(0) += 1;
        self.known
            .lock()
            .unwrap()
            .get(group_id)
            .copied()
            .ok_or_else(|| OrchestratorError::GroupNotFound {
                group: group_id.to_string(),
            })
    }
}

struct SilentAlerts;

#[async_trait]
impl AlertDispatcher for SilentAlerts {
    async fn notify(&self, _notice: &AlertNotice) -> Result<()> {
        Ok(())
    }
}

fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(10),
        discovery_interval: Duration::from_millis(10),
        source_timeout: Duration::from_millis(50),
    }
}

fn supervisor(
    policy: AutoscalePolicy,
    groups: Arc<ListedGroups>,
    memory: Option<f64>,
    orchestrator: Arc<CountingOrchestrator>,
) -> Result<FleetSupervisor, ConfigError> {
    supervisor_with(fast_settings(), policy, groups, memory, orchestrator)
}

fn supervisor_with(
    settings: SchedulerSettings,
    policy: AutoscalePolicy,
    groups: Arc<ListedGroups>,
    memory: Option<f64>,
    orchestrator: Arc<CountingOrchestrator>,
) -> Result<FleetSupervisor, ConfigError> {
    FleetSupervisor::new(
        policy,
        groups,
        Collaborators {
            metrics: Arc::new(ConstantMemory(memory)),
            orchestrator,
            alerts: Arc::new(SilentAlerts),
        },
        settings,
    )
}

#[tokio::test]
async fn invalid_policy_is_rejected() {
    let mut policy = AutoscalePolicy::default();
    policy
        .dimensions
        .get_mut(&Dimension::Cpu)
        .unwrap()
        .thresholds = StageThresholdSet::rising(90.0, 80.0, 70.0);

    let result = supervisor(
        policy,
        Arc::default(),
        None,
        Arc::new(CountingOrchestrator::default()),
    );
    assert!(matches!(
        result,
        Err(ConfigError::NonMonotonicThresholds { .. })
    ));
}

#[tokio::test]
async fn reconcile_tracks_group_source() {
    let groups = Arc::new(ListedGroups::default());
    groups.set(vec![GroupSpec::new("a", 3), GroupSpec::new("b", 3)]);
    let mut supervisor = supervisor(
        AutoscalePolicy::default(),
        groups.clone(),
        None,
        Arc::new(CountingOrchestrator::knowing(&[("a", 1), ("b", 1)])),
    )
    .unwrap();

    supervisor.reconcile().await.unwrap();
    assert_eq!(supervisor.managed_groups(), vec!["a", "b"]);

    groups.set(vec![GroupSpec::new("a", 3), GroupSpec::new("c", 3)]);
    supervisor.reconcile().await.unwrap();
    assert_eq!(supervisor.managed_groups(), vec!["a", "c"]);
}

#[tokio::test]
async fn reconcile_skips_invalid_group() {
    let groups = Arc::new(ListedGroups::default());
    let mut inverted = GroupSpec::new("bad", 1);
    inverted.minimum_instances = 5;
    groups.set(vec![inverted, GroupSpec::new("good", 3)]);
    let mut supervisor = supervisor(
        AutoscalePolicy::default(),
        groups,
        None,
        Arc::new(CountingOrchestrator::knowing(&[("good", 1)])),
    )
    .unwrap();

    supervisor.reconcile().await.unwrap();
    assert_eq!(supervisor.managed_groups(), vec!["good"]);
}

#[tokio::test(start_paused = true)]
async fn gone_group_resumes_when_orchestrator_knows_it_again() {
    let groups = Arc::new(ListedGroups::default());
    groups.set(vec![GroupSpec::new("live", 3), GroupSpec::new("ghost", 3)]);
    let orchestrator = Arc::new(CountingOrchestrator::knowing(&[("live", 1)]));
    let settings = SchedulerSettings {
        discovery_interval: Duration::from_millis(100),
        ..fast_settings()
    };
    let supervisor = supervisor_with(
        settings,
        AutoscalePolicy::default(),
        groups,
        None,
        orchestrator.clone(),
    )
    .unwrap();

    let (stop, stopped) = watch::channel(false);
    let fleet = tokio::spawn(supervisor.run(stopped));

    // While gone, the group is only checked once per discovery pass
    tokio::time::sleep(Duration::from_millis(150)).await;
    let while_gone = orchestrator.calls("ghost");
    assert!(while_gone <= 3, "ghost checked {while_gone} times while gone");

    // Once the orchestrator knows it again, a worker polls it every cycle
    orchestrator.learn("ghost", 2);
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop.send(true).unwrap();
    fleet.await.unwrap().unwrap();

    assert!(orchestrator.calls("ghost") >= while_gone + 10);
    assert!(orchestrator.calls("live") > 10);
}

#[tokio::test(start_paused = true)]
async fn restarted_worker_never_overlaps_its_predecessor() {
    // Given a group whose every cycle submits a slow shutdown
    let mut policy = AutoscalePolicy::default();
    policy.shutdown_thresholds.stage_three = 1;
    let groups = Arc::new(ListedGroups::default());
    groups.set(vec![GroupSpec::new("hot", 3)]);
    let orchestrator = Arc::new(CountingOrchestrator {
        apply_delay: Some(Duration::from_millis(50)),
        ..CountingOrchestrator::knowing(&[("hot", 2)])
    });
    let mut supervisor =
        supervisor(policy, groups.clone(), Some(97.0), orchestrator.clone()).unwrap();

    supervisor.reconcile().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.in_flight.load(Ordering::SeqCst), 1);

    // When the group's settings change mid-submission
    groups.set(vec![GroupSpec::new("hot", 5)]);
    supervisor.reconcile().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Then at most one submission for the group was ever in flight
    assert_eq!(orchestrator.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.managed_groups(), vec!["hot"]);
}

#[tokio::test]
async fn failed_shutdown_stops_fleet() {
    let mut policy = AutoscalePolicy::default();
    policy.shutdown_thresholds.stage_three = 1;
    let groups = Arc::new(ListedGroups::default());
    groups.set(vec![GroupSpec::new("hot", 3)]);
    let orchestrator = Arc::new(CountingOrchestrator {
        fail_apply: true,
        ..CountingOrchestrator::knowing(&[("hot", 2)])
    });
    let supervisor = supervisor(policy, groups, Some(97.0), orchestrator).unwrap();

    let (_stop, stopped) = watch::channel(false);
    let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor.run(stopped))
        .await
        .expect("fleet should stop on its own");

    assert!(matches!(
        outcome,
        Err(CycleError::ShutdownNotApplied { ref group, .. }) if group == "hot"
    ));
}

#[tokio::test]
async fn shutdown_signal_stops_workers() {
    let groups = Arc::new(ListedGroups::default());
    groups.set(vec![GroupSpec::new("a", 3)]);
    let orchestrator = Arc::new(CountingOrchestrator::knowing(&[("a", 1)]));
    let supervisor = supervisor(
        AutoscalePolicy::default(),
        groups,
        None,
        orchestrator.clone(),
    )
    .unwrap();

    let (stop, stopped) = watch::channel(false);
    let fleet = tokio::spawn(supervisor.run(stopped));
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.send(true).unwrap();
    fleet.await.unwrap().unwrap();

    let calls_at_stop = orchestrator.calls("a");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(orchestrator.calls("a"), calls_at_stop);
}
