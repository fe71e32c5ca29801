//! Orchestrator capability
//!
//! The engine never talks to a backend directly. Adapters execute decisions
//! and report the authoritative instance count back at the start of a cycle.

use crate::error::OrchestratorError;
use crate::model::ScalingDecision;
use async_trait::async_trait;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submit a decision. Resubmitting the same decision id must not
    /// double-apply it.
    async fn apply_decision(&self, decision: &ScalingDecision) -> Result<(), OrchestratorError>;

    /// Instance count currently running for the group.
    async fn current_count(&self, group_id: &str) -> Result<u32, OrchestratorError>;
}
