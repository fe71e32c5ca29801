//! Fleet Autoscaler - scales container groups from resource pressure and queue backlog
//!
//! This service wires the autoscale core to its collaborators: an HTTP metrics
//! API for readings and queue depths, an HTTP groups API for instance counts
//! and scale calls, and log-based alerting. By default it runs in log-only mode
//! and only simulates the decisions it makes.

pub mod alerts;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod service;

pub use alerts::LogAlertDispatcher;
pub use config::Config;
pub use metrics::HttpMetricSource;
pub use orchestrator::{HttpOrchestrator, LogOnlyOrchestrator};
pub use policy::{load_policy, LoadedPolicy, PolicyFile};
pub use service::build_supervisor;
