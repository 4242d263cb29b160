use crate::binding::{NoopBinder, PodBinder};
use gpushare_scheduler::{Inventory, Scheduler, SchedulerConfig};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Device inventory, for ingestion and status
    pub inventory: Arc<Inventory>,

    /// Filter/score/bind pipeline over the same inventory
    pub scheduler: Arc<Scheduler>,

    /// Downstream binding step run after a successful reserve
    pub binder: Arc<dyn PodBinder>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(
        inventory: Arc<Inventory>,
        scheduler: Arc<Scheduler>,
        binder: Arc<dyn PodBinder>,
    ) -> Self {
        Self {
            inventory,
            scheduler,
            binder,
        }
    }

    /// Build the scheduler over `inventory` and only record allocations
    pub fn with_inventory(inventory: Arc<Inventory>, config: SchedulerConfig) -> Self {
        let scheduler = Arc::new(Scheduler::new(inventory.clone(), config));
        Self::new(inventory, scheduler, Arc::new(NoopBinder))
    }
}
