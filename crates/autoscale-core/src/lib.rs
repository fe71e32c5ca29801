//! Autoscale core - staged resource evaluation and scaling decisions
//!
//! Turns periodic resource readings and queue backlog into one scaling decision
//! per group per cycle. Collaborators (metric sources, orchestrators, alert
//! transports) plug in through the traits in [`source`], [`orchestrator`] and
//! [`alert`]; the [`scheduler`] drives one sequential worker per group.

pub mod alert;
pub mod backlog;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod group;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod scheduler;
pub mod source;

pub use alert::{AlertDispatcher, AlertNotice, Alerter};
pub use backlog::{aggregate_depth, estimate, BacklogProfile, QueueDepth, StagingQueueFilter};
pub use engine::DecisionEngine;
pub use error::{ConfigError, CycleError, OrchestratorError, SourceError};
pub use evaluator::{evaluate, BreachCounters, StageResult};
pub use group::GroupState;
pub use model::{Dimension, ResourceSample, ScalingDecision, ScalingReason, Stage};
pub use orchestrator::Orchestrator;
pub use policy::{
    AlertSettings, AutoscalePolicy, DimensionPolicy, GroupSpec, ShutdownThresholds,
    StageReduction, StageThresholdSet, ThresholdDirection,
};
pub use scheduler::{Collaborators, FleetSupervisor, GroupWorker, SchedulerSettings};
pub use source::{GroupSource, MetricSource, StaticGroupSource, ThrottledMetricSource};
