//! Group workers and the fleet supervisor
//!
//! Each managed group gets one tokio task that runs its cycles strictly in
//! sequence. The supervisor owns the workers, keeps them in line with the
//! group source, and stops the whole fleet on a fatal cycle error.

use crate::alert::{AlertDispatcher, AlertNotice, Alerter};
use crate::backlog::{aggregate_depth, estimate, StagingQueueFilter};
use crate::engine::DecisionEngine;
use crate::error::{ConfigError, CycleError, OrchestratorError, SourceError};
use crate::evaluator::{evaluate, StageResult};
use crate::group::GroupState;
use crate::model::{Dimension, ResourceSample, ScalingDecision};
use crate::orchestrator::Orchestrator;
use crate::policy::{AutoscalePolicy, GroupSpec};
use crate::source::{GroupSource, MetricSource};
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Timing knobs shared by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub discovery_interval: Duration,
    /// Upper bound on each metric source call
    pub source_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            discovery_interval: Duration::from_secs(60),
            source_timeout: Duration::from_secs(5),
        }
    }
}

/// Collaborators handed to every worker
#[derive(Clone)]
pub struct Collaborators {
    pub metrics: Arc<dyn MetricSource>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub alerts: Arc<dyn AlertDispatcher>,
}

/// Sequential evaluation loop for one group
pub struct GroupWorker {
    policy: Arc<AutoscalePolicy>,
    engine: DecisionEngine,
    staging_filter: Option<StagingQueueFilter>,
    state: GroupState,
    alerter: Alerter,
    metrics: Arc<dyn MetricSource>,
    orchestrator: Arc<dyn Orchestrator>,
    settings: SchedulerSettings,
}

impl GroupWorker {
    pub fn new(
        policy: Arc<AutoscalePolicy>,
        group: GroupSpec,
        collaborators: Collaborators,
        settings: SchedulerSettings,
    ) -> Result<Self, ConfigError> {
        let staging_filter = policy.staging_filter_for(&group)?;
        let state = GroupState::new(group.id.clone());
        let engine = DecisionEngine::new(&policy, group)?;
        let alerter = Alerter::new(collaborators.alerts, policy.alerting.clone());

        Ok(Self {
            policy,
            engine,
            staging_filter,
            state,
            alerter,
            metrics: collaborators.metrics,
            orchestrator: collaborators.orchestrator,
            settings,
        })
    }

    pub fn group(&self) -> &GroupSpec {
        self.engine.group()
    }

    pub fn state(&self) -> &GroupState {
        &self.state
    }

    /// Run one full evaluation cycle and submit the resulting decision.
    #[instrument(skip(self), fields(group = %self.engine.group().id))]
    pub async fn run_cycle(&mut self) -> Result<ScalingDecision, CycleError> {
        let group_id = self.engine.group().id.clone();

        self.state.current_instance_count = self
            .orchestrator
            .current_count(&group_id)
            .await
            .map_err(|e| match e {
                OrchestratorError::GroupNotFound { group } => CycleError::GroupGone { group },
                other => CycleError::CountUnavailable {
                    group: group_id.clone(),
                    source: other,
                },
            })?;

        let samples = self.collect_samples(&group_id).await;
        let stage_results = self.evaluate_samples(&group_id, samples);
        self.dispatch_alerts(&group_id, &stage_results).await;

        let backlog_delta = self.backlog_delta(&group_id).await;
        let decision = self
            .engine
            .decide(&self.state, &stage_results, backlog_delta, Utc::now());
        self.state.record(&decision);

        info!(
            decision_id = %decision.id,
            current = decision.current_count,
            target = decision.target_count,
            reason = %decision.reason,
            "Scaling decision"
        );

        if decision.changes_count() || decision.is_shutdown() {
            self.submit(&decision).await?;
        }

        Ok(decision)
    }

    async fn collect_samples(
        &self,
        group_id: &str,
    ) -> Vec<(Dimension, Result<Option<ResourceSample>, SourceError>)> {
        let timeout = self.settings.source_timeout;
        let metrics = &self.metrics;

        join_all(self.policy.dimensions.keys().map(|dimension| async move {
            let reading = match time::timeout(timeout, metrics.sample(group_id, *dimension)).await
            {
                Ok(reading) => reading,
                Err(_) => Err(SourceError::Timeout {
                    millis: timeout.as_millis(),
                }),
            };
            (*dimension, reading)
        }))
        .await
    }

    fn evaluate_samples(
        &mut self,
        group_id: &str,
        samples: Vec<(Dimension, Result<Option<ResourceSample>, SourceError>)>,
    ) -> Vec<StageResult> {
        let mut results = Vec::with_capacity(samples.len());

        for (dimension, reading) in samples {
            let Some(dimension_policy) = self.policy.dimensions.get(&dimension) else {
                continue;
            };

            let sample = match reading {
                Ok(Some(sample)) => sample,
                other => {
                    let missing = self.state.mark_missing(dimension);
                    let cause = match other {
                        Err(e) => e.to_string(),
                        Ok(_) => "no sample".to_string(),
                    };
                    if self.state.became_degraded(dimension) {
                        warn!(
                            group = %group_id,
                            dimension = %dimension,
                            missing_cycles = missing,
                            cause = %cause,
                            "Dimension degraded"
                        );
                    } else {
                        debug!(
                            group = %group_id,
                            dimension = %dimension,
                            missing_cycles = missing,
                            cause = %cause,
                            "Skipping dimension without sample"
                        );
                    }
                    continue;
                }
            };

            if !self.state.claim_sample(dimension, sample.timestamp) {
                debug!(
                    group = %group_id,
                    dimension = %dimension,
                    taken_at = %sample.timestamp,
                    "Reading already evaluated; counters unchanged"
                );
                continue;
            }

            let result = evaluate(
                &sample,
                dimension_policy,
                &self.policy.shutdown_thresholds,
                self.state.counters_mut(dimension),
            );
            debug!(
                group = %group_id,
                dimension = %dimension,
                value = result.value,
                stage = %result.stage,
                consecutive = result.consecutive,
                authorized = %result.authorized,
                "Evaluated sample"
            );
            results.push(result);
        }

        results
    }

    async fn dispatch_alerts(&mut self, group_id: &str, results: &[StageResult]) {
        let now = Utc::now();
        for result in results {
            let breached = self
                .policy
                .dimensions
                .get(&result.dimension)
                .map(|p| p.should_alert(result.value))
                .unwrap_or(false);
            if !breached {
                continue;
            }

            let notice = AlertNotice {
                group_id: group_id.to_string(),
                dimension: result.dimension,
                stage: result.stage,
                value: result.value,
            };
            self.alerter.dispatch(notice, now).await;
        }
    }

    async fn backlog_delta(&mut self, group_id: &str) -> i64 {
        let timeout = self.settings.source_timeout;
        let queues = match time::timeout(timeout, self.metrics.queue_depths(group_id)).await {
            Ok(Ok(queues)) => queues,
            Ok(Err(e)) => {
                warn!(group = %group_id, error = %e, "Queue depths unavailable; no backlog signal");
                return 0;
            }
            Err(_) => {
                warn!(
                    group = %group_id,
                    timeout_ms = timeout.as_millis(),
                    "Queue depth query timed out; no backlog signal"
                );
                return 0;
            }
        };

        let depth = aggregate_depth(
            &queues,
            self.staging_filter.as_ref(),
            self.state.staging_depths(),
        );
        self.state.remember_depths(&queues);

        let delta = estimate(
            depth,
            self.engine.profile().backlog_goal,
            self.state.current_instance_count,
        );
        debug!(group = %group_id, depth, delta, "Backlog estimate");
        delta
    }

    async fn submit(&self, decision: &ScalingDecision) -> Result<(), CycleError> {
        match self.orchestrator.apply_decision(decision).await {
            Ok(()) => Ok(()),
            Err(OrchestratorError::GroupNotFound { group }) => Err(CycleError::GroupGone { group }),
            Err(e) if decision.is_shutdown() => Err(CycleError::ShutdownNotApplied {
                group: decision.group_id.clone(),
                source: e,
            }),
            Err(e) => {
                warn!(
                    decision_id = %decision.id,
                    error = %e,
                    "Failed to apply decision; count will be re-read next cycle"
                );
                Ok(())
            }
        }
    }

    /// Tick until cancelled. Returns the error that ended the loop, if any.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<(), CycleError> {
        let group_id = self.group().id.clone();
        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(group = %group_id, "Group worker started");

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.changed() => {
                    info!(group = %group_id, "Cycle cancelled; no decision emitted");
                    break;
                }
                outcome = self.run_cycle() => outcome,
            };

            match outcome {
                Ok(_) => {}
                Err(e @ CycleError::CountUnavailable { .. }) => {
                    warn!(group = %group_id, error = %e, "Skipping cycle");
                }
                Err(e) => {
                    if e.is_fatal() {
                        error!(group = %group_id, error = %e, "Fatal cycle error");
                    } else {
                        info!(group = %group_id, error = %e, "Group worker stopping");
                    }
                    return Err(e);
                }
            }
        }

        info!(group = %group_id, "Group worker stopped");
        Ok(())
    }
}

struct WorkerHandle {
    spec: GroupSpec,
    generation: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Terminal error of one worker, tagged with the worker it came from
struct WorkerExit {
    group_id: String,
    generation: u64,
    error: CycleError,
}

/// Owner of all group workers
pub struct FleetSupervisor {
    policy: Arc<AutoscalePolicy>,
    groups: Arc<dyn GroupSource>,
    collaborators: Collaborators,
    settings: SchedulerSettings,
    workers: HashMap<String, WorkerHandle>,
    /// Groups the orchestrator reported gone while the group source still lists them
    retired: HashSet<String>,
    next_generation: u64,
    exits_tx: mpsc::Sender<WorkerExit>,
    exits_rx: mpsc::Receiver<WorkerExit>,
}

impl FleetSupervisor {
    /// Refuses to build with an invalid policy.
    pub fn new(
        policy: AutoscalePolicy,
        groups: Arc<dyn GroupSource>,
        collaborators: Collaborators,
        settings: SchedulerSettings,
    ) -> Result<Self, ConfigError> {
        policy.validate()?;
        let (exits_tx, exits_rx) = mpsc::channel(64);

        Ok(Self {
            policy: Arc::new(policy),
            groups,
            collaborators,
            settings,
            workers: HashMap::new(),
            retired: HashSet::new(),
            next_generation: 0,
            exits_tx,
            exits_rx,
        })
    }

    /// Ids of the groups that currently have a worker, sorted.
    pub fn managed_groups(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Bring the worker set in line with the group source.
    pub async fn reconcile(&mut self) -> Result<(), SourceError> {
        let listed = self.groups.list_groups().await?;
        let mut seen = HashSet::new();

        for group in listed {
            if !seen.insert(group.id.clone()) {
                warn!(group = %group.id, "Duplicate group listed; ignoring repeat");
                continue;
            }
            if self.retired.contains(&group.id) && !self.group_returned(&group.id).await {
                continue;
            }

            match self.workers.get(&group.id) {
                Some(handle) if handle.spec == group => continue,
                Some(_) => {
                    info!(group = %group.id, "Group settings changed; restarting worker");
                    if let Some(task) = self.stop_worker(&group.id) {
                        let _ = task.await;
                    }
                }
                None => {}
            }

            if let Err(e) = self.start_worker(group.clone()) {
                error!(group = %group.id, error = %e, "Rejected group configuration");
            }
        }

        let removed: Vec<String> = self
            .workers
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in removed {
            info!(group = %id, "Group no longer listed; stopping worker");
            self.stop_worker(&id);
        }
        self.retired.retain(|id| seen.contains(id));

        Ok(())
    }

    /// Ask the orchestrator whether a retired group exists again.
    async fn group_returned(&mut self, group_id: &str) -> bool {
        match self.collaborators.orchestrator.current_count(group_id).await {
            Ok(_) => {
                info!(group = %group_id, "Orchestrator knows group again; resuming");
                self.retired.remove(group_id);
                true
            }
            Err(OrchestratorError::GroupNotFound { .. }) => false,
            Err(e) => {
                debug!(group = %group_id, error = %e, "Could not check retired group");
                false
            }
        }
    }

    fn start_worker(&mut self, group: GroupSpec) -> Result<(), ConfigError> {
        let worker = GroupWorker::new(
            self.policy.clone(),
            group.clone(),
            self.collaborators.clone(),
            self.settings,
        )?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let (cancel, cancelled) = watch::channel(false);
        let exits = self.exits_tx.clone();
        let group_id = group.id.clone();
        let task = tokio::spawn(async move {
            if let Err(error) = worker.run(cancelled).await {
                let _ = exits
                    .send(WorkerExit {
                        group_id,
                        generation,
                        error,
                    })
                    .await;
            }
        });

        self.workers.insert(
            group.id.clone(),
            WorkerHandle {
                spec: group,
                generation,
                cancel,
                task,
            },
        );
        Ok(())
    }

    fn stop_worker(&mut self, group_id: &str) -> Option<JoinHandle<()>> {
        self.workers.remove(group_id).map(|handle| {
            let _ = handle.cancel.send(true);
            handle.task
        })
    }

    async fn stop_all(&mut self) {
        let ids: Vec<String> = self.workers.keys().cloned().collect();
        let tasks: Vec<JoinHandle<()>> = ids.iter().filter_map(|id| self.stop_worker(id)).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn handle_exit(&mut self, exit: WorkerExit) -> Result<(), CycleError> {
        if exit.error.is_fatal() {
            return Err(exit.error);
        }
        let current = self
            .workers
            .get(&exit.group_id)
            .map(|handle| handle.generation);
        if current != Some(exit.generation) {
            debug!(group = %exit.group_id, "Ignoring exit of a replaced worker");
            return Ok(());
        }
        if let CycleError::GroupGone { .. } = exit.error {
            warn!(group = %exit.group_id, "Orchestrator no longer knows group; removing it");
            self.stop_worker(&exit.group_id);
            self.retired.insert(exit.group_id);
        }
        Ok(())
    }

    /// Supervise the fleet until `shutdown` flips or a worker fails fatally.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CycleError> {
        let mut discovery = time::interval(self.settings.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis(),
            discovery_interval_ms = self.settings.discovery_interval.as_millis(),
            "Fleet supervisor started"
        );

        let outcome = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break Ok(());
                    }
                }
                _ = discovery.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "Group discovery failed; keeping current workers");
                    }
                }
                Some(exit) = self.exits_rx.recv() => {
                    if let Err(fatal) = self.handle_exit(exit) {
                        error!(error = %fatal, "Stopping fleet");
                        break Err(fatal);
                    }
                }
            }
        };

        self.stop_all().await;
        info!("Fleet supervisor stopped");
        outcome
    }
}
