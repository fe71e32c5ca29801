use crate::model::Dimension;
use thiserror::Error;

/// Rejected policy; the supervisor refuses to start with one of these
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Stage limits for {dimension} must be strictly {expected}: got {one}, {two}, {three}")]
    NonMonotonicThresholds {
        dimension: Dimension,
        expected: &'static str,
        one: f64,
        two: f64,
        three: f64,
    },

    #[error("Stage limit for {dimension} is not a finite number")]
    NonFiniteThreshold { dimension: Dimension },

    #[error("Shutdown threshold for stage {stage} must be a positive integer")]
    InvalidShutdownThreshold { stage: u8 },

    #[error("Backlog goal for profile {profile} must be greater than zero")]
    InvalidBacklogGoal { profile: String },

    #[error("Scaling delay for profile {profile} must not be negative: {seconds}")]
    NegativeScalingDelay { profile: String, seconds: i64 },

    #[error("Group {group}: minimum instances {minimum} exceeds maximum instances {maximum}")]
    InvalidInstanceBounds {
        group: String,
        minimum: u32,
        maximum: u32,
    },

    #[error("Stage {stage} retain factor must be within [0, 1): {value}")]
    InvalidRetainFactor { stage: u8, value: f64 },

    #[error("Backlog profile not found: {profile}")]
    ProfileNotFound { profile: String },

    #[error("Staging queue indicator produces an invalid pattern: {message}")]
    InvalidStagingIndicator { message: String },

    #[error("Duplicate group id: {group}")]
    DuplicateGroup { group: String },
}

/// Failure to obtain a reading from a metric source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Metric source timed out after {millis}ms")]
    Timeout { millis: u128 },

    #[error("Metric source unavailable: {message}")]
    Unavailable { message: String },
}

/// Failure reported by an orchestrator adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Group not found on orchestrator: {group}")]
    GroupNotFound { group: String },

    #[error("Orchestrator request failed: {message}")]
    RequestFailed { message: String },
}

/// Outcome of a failed group cycle
#[derive(Error, Debug)]
pub enum CycleError {
    /// The orchestrator no longer knows the group; its worker should be removed.
    #[error("Group {group} is no longer managed by the orchestrator")]
    GroupGone { group: String },

    /// Instance count could not be refreshed; the cycle is skipped.
    #[error("Failed to refresh instance count for {group}: {source}")]
    CountUnavailable {
        group: String,
        #[source]
        source: OrchestratorError,
    },

    /// A shutdown could not be executed. This is fatal for the fleet.
    #[error("Shutdown of group {group} was not applied: {source}")]
    ShutdownNotApplied {
        group: String,
        #[source]
        source: OrchestratorError,
    },
}

impl CycleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::ShutdownNotApplied { .. })
    }
}
