// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// Malformed or unusable request
    #[error("Invalid request: {0}")]
    #[diagnostic(
        code(scheduler::validation_error),
        help("Fix the pod's GPU resources; retrying the same request will fail again")
    )]
    ValidationError(#[from] gpushare_core::GpushareError),

    /// No node can host the request
    #[error("No feasible node for pod {pod}: {reason}")]
    #[diagnostic(
        code(scheduler::infeasible),
        help("The pod may be re-queued for a later scheduling cycle once GPU shares are released")
    )]
    Infeasible { pod: String, reason: String },

    /// Lost a concurrent reservation, or the node changed since scoring
    #[error("Capacity race binding pod {pod} to {node}/{device}: {reason}")]
    #[diagnostic(
        code(scheduler::capacity_race),
        help("Retry: re-run filter and scoring against a fresh snapshot")
    )]
    CapacityRace {
        pod: String,
        node: String,
        device: u32,
        reason: String,
    },

    /// Pod already holds an allocation elsewhere
    #[error("Pod {pod} is already bound to {node}/{device}")]
    #[diagnostic(
        code(scheduler::already_bound),
        help("Delete the pod, or wait for its deletion to release the existing allocation")
    )]
    AlreadyBound {
        pod: String,
        node: String,
        device: u32,
    },

    /// Node or device referenced but not present in the inventory
    #[error("Inventory inconsistency: {message}")]
    #[diagnostic(
        code(scheduler::inventory_inconsistency),
        help("Check that the node's devices have been reported to the extender")
    )]
    InventoryInconsistency { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create an Infeasible error
    pub fn infeasible(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Infeasible {
            pod: pod.into(),
            reason: reason.into(),
        }
    }

    /// Create a CapacityRace error
    pub fn capacity_race(
        pod: impl Into<String>,
        node: impl Into<String>,
        device: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::CapacityRace {
            pod: pod.into(),
            node: node.into(),
            device,
            reason: reason.into(),
        }
    }

    /// Create an InventoryInconsistency error
    pub fn inventory_inconsistency(message: impl Into<String>) -> Self {
        Self::InventoryInconsistency {
            message: message.into(),
        }
    }

    /// Whether the caller should retry with a fresh snapshot
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityRace { .. })
    }
}
