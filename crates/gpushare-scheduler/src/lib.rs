//! gpushare Scheduler - GPU share admission, scoring and binding
//!
//! This crate provides:
//! - In-memory device inventory with per-device reservation locks
//! - Filter predicates (node known, healthy device, device fits)
//! - Scoring policies (bin-packing, spread)
//! - Binder that re-validates and reserves a chosen device
//! - Scheduler pipeline tracking per-pod attempt state

pub mod binder;
pub mod error;
pub mod filter;
pub mod inventory;
pub mod scheduler;
pub mod score;
pub mod types;

// Re-export commonly used types
pub use binder::Binder;
pub use error::{Result, SchedulerError};
pub use filter::FeasibilityFilter;
pub use inventory::{
    DeviceInventory, DeviceSnapshot, Inventory, InventoryConfig, InventorySnapshot,
    InventorySummary, NodeSnapshot, Rejected,
};
pub use scheduler::{AttemptState, Scheduler, SchedulerConfig};
pub use score::{select_device, ScoringEngine, ScoringPolicy};
pub use types::{ExclusionReason, FilterOutcome, FilterResult, ScoreResult};
