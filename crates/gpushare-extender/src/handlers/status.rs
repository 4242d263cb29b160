use crate::AppState;
use axum::extract::State;
use axum::Json;
use gpushare_core::Allocation;
use gpushare_scheduler::{InventorySnapshot, InventorySummary, ScoringPolicy};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Inventory and scheduler state
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub policy: ScoringPolicy,
    pub summary: InventorySummary,
    pub pending_attempts: usize,
    pub inventory: InventorySnapshot,
    pub allocations: Vec<Allocation>,
}

/// GET /gpushare-scheduler/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    let inventory = state.inventory.snapshot_all();

    Json(StatusReport {
        policy: state.scheduler.policy(),
        summary: inventory.summary(),
        pending_attempts: state.scheduler.pending_attempts(),
        inventory,
        allocations: state.inventory.allocations(),
    })
}

/// GET /version
pub async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
