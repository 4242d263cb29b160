use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::{AppState, Result};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gpushare_core::{devices_from_specs, Allocation, DeviceSpec, PodKey};
use gpushare_scheduler::{DeviceInventory, NodeSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Device report for one node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeReport {
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeSynced {
    node: Option<NodeSnapshot>,
    dropped_allocations: Vec<Allocation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PodReleased {
    pod: String,
    released: Option<Allocation>,
}

/// PUT /gpushare-scheduler/nodes/{name}
pub async fn put_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(report): Json<NodeReport>,
) -> Result<Response> {
    let devices = devices_from_specs(&name, &report.devices)?;
    info!("Syncing node {} ({} devices)", name, devices.len());

    let dropped = state.inventory.upsert_node(&name, devices);
    let node = state.inventory.snapshot(&[name.clone()]).nodes.remove(&name);

    Ok(ApiResponse::ok(NodeSynced {
        node,
        dropped_allocations: dropped,
    })
    .into_response())
}

/// DELETE /gpushare-scheduler/nodes/{name}
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response> {
    if state.inventory.snapshot(&[name.clone()]).get(&name).is_none() {
        return Err(ApiError::NotFound(format!("node {} not found", name)));
    }

    info!("Removing node {}", name);
    let dropped = state.inventory.remove_node(&name);

    Ok(ApiResponse::ok(NodeSynced {
        node: None,
        dropped_allocations: dropped,
    })
    .into_response())
}

/// DELETE /gpushare-scheduler/pods/{namespace}/{name}
pub async fn delete_pod(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response> {
    let pod = PodKey::new(namespace, name);
    let released = state.scheduler.pod_deleted(&pod);

    Ok(ApiResponse::ok(PodReleased {
        pod: pod.to_string(),
        released,
    })
    .into_response())
}
