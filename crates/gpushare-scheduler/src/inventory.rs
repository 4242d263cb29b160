use crate::types::ExclusionReason;
use chrono::{DateTime, Utc};
use gpushare_core::{
    Allocation, AllocationId, AllocationRequest, GpuDevice, GpuQuantities, PodKey,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration for the device inventory
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Nodes not synced within this window are reported stale
    pub stale_after: Option<Duration>,
    /// How long `reserve` waits for a contended device before giving up
    pub reserve_timeout: Duration,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            stale_after: None,
            reserve_timeout: Duration::from_millis(10),
        }
    }
}

/// Why a reservation was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("node {0} not found in inventory")]
    NodeNotFound(String),

    #[error("device {device} not found on node {node}")]
    DeviceNotFound { node: String, device: u32 },

    #[error("device {device} on node {node} is unhealthy")]
    DeviceUnhealthy { node: String, device: u32 },

    #[error("insufficient memory: requested {requested} bytes, free {free} bytes")]
    InsufficientMemory { requested: u64, free: u64 },

    #[error("insufficient compute share: requested {requested}, free {free}")]
    InsufficientCompute { requested: u32, free: u32 },

    #[error("device {device} on node {node} is locked by a concurrent reservation")]
    CapacityRace { node: String, device: u32 },

    #[error("pod {} already holds allocation {} on {}/{}", .existing.pod, .existing.id, .existing.node, .existing.device)]
    PodAlreadyAllocated { existing: Box<Allocation> },
}

impl Rejected {
    /// Whether a fresh filter/score pass could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Rejected::CapacityRace { .. }
                | Rejected::InsufficientMemory { .. }
                | Rejected::InsufficientCompute { .. }
                | Rejected::DeviceUnhealthy { .. }
        )
    }
}

/// Point-in-time state of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device: GpuDevice,
    pub used_memory: u64,
    pub used_compute: u32,
    pub allocations: usize,
    /// Bumped on every mutation of the device
    pub version: u64,
}

impl DeviceSnapshot {
    pub fn free_memory(&self) -> u64 {
        self.device.memory_bytes.saturating_sub(self.used_memory)
    }

    pub fn free_compute(&self) -> u32 {
        self.device.compute_capacity().saturating_sub(self.used_compute)
    }

    /// Check whether this device can host the request right now
    pub fn fits(&self, request: &AllocationRequest) -> Result<(), ExclusionReason> {
        if !self.device.healthy {
            return Err(ExclusionReason::NoHealthyDevice);
        }
        if request.memory_bytes > self.free_memory() {
            return Err(ExclusionReason::InsufficientMemory);
        }
        if request.compute_share > self.free_compute() {
            return Err(ExclusionReason::InsufficientCompute);
        }
        Ok(())
    }
}

/// Point-in-time state of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub name: String,
    pub devices: Vec<DeviceSnapshot>,
    pub synced_at: DateTime<Utc>,
    pub stale: bool,
}

impl NodeSnapshot {
    /// Look up a device by index
    pub fn device(&self, index: u32) -> Option<&DeviceSnapshot> {
        self.devices.iter().find(|d| d.device.index == index)
    }

    /// Devices that may receive new allocations
    pub fn healthy_devices(&self) -> impl Iterator<Item = &DeviceSnapshot> {
        self.devices.iter().filter(|d| d.device.healthy)
    }

    /// Compute share in use across healthy devices
    pub fn used_compute(&self) -> u64 {
        self.healthy_devices().map(|d| d.used_compute as u64).sum()
    }

    /// Compute share capacity across healthy devices
    pub fn total_compute(&self) -> u64 {
        self.healthy_devices()
            .map(|d| d.device.compute_capacity() as u64)
            .sum()
    }
}

/// Consistent per-device view of a set of nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventorySnapshot {
    pub nodes: BTreeMap<String, NodeSnapshot>,
}

impl InventorySnapshot {
    pub fn get(&self, node: &str) -> Option<&NodeSnapshot> {
        self.nodes.get(node)
    }

    /// Aggregate counters over the snapshot
    pub fn summary(&self) -> InventorySummary {
        let mut summary = InventorySummary {
            nodes: self.nodes.len(),
            ..Default::default()
        };

        for node in self.nodes.values() {
            if node.stale {
                summary.stale_nodes += 1;
            }
            for device in &node.devices {
                summary.devices += 1;
                summary.allocations += device.allocations;
                summary.total_memory += device.device.memory_bytes;
                summary.used_memory += device.used_memory;
                summary.total_compute += device.device.compute_capacity() as u64;
                summary.used_compute += device.used_compute as u64;
                if device.device.healthy {
                    summary.healthy_devices += 1;
                }
            }
        }

        summary
    }
}

/// Cluster-wide GPU usage counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub nodes: usize,
    pub stale_nodes: usize,
    pub devices: usize,
    pub healthy_devices: usize,
    pub allocations: usize,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_compute: u64,
    pub used_compute: u64,
}

/// Read and reserve operations the scheduling pipeline depends on
pub trait DeviceInventory: Send + Sync {
    /// Snapshot the named nodes; unknown names are absent from the result
    fn snapshot(&self, node_names: &[String]) -> InventorySnapshot;

    /// Atomically grant the request on one device
    fn reserve(
        &self,
        node: &str,
        device: u32,
        request: &AllocationRequest,
    ) -> Result<Allocation, Rejected>;

    /// Release an allocation; unknown ids are a no-op
    fn release(&self, id: &AllocationId) -> Option<Allocation>;

    /// Release whatever the pod holds
    fn release_pod(&self, pod: &PodKey) -> Option<Allocation>;

    /// Current allocation of a pod
    fn allocation_for(&self, pod: &PodKey) -> Option<Allocation>;
}

struct DeviceState {
    device: GpuDevice,
    allocations: HashMap<AllocationId, Allocation>,
    used_memory: u64,
    used_compute: u32,
    version: u64,
    /// Set once the device disappears from its node's report
    retired: bool,
}

impl DeviceState {
    fn new(device: GpuDevice) -> Self {
        Self {
            device,
            allocations: HashMap::new(),
            used_memory: 0,
            used_compute: 0,
            version: 0,
            retired: false,
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device: self.device.clone(),
            used_memory: self.used_memory,
            used_compute: self.used_compute,
            allocations: self.allocations.len(),
            version: self.version,
        }
    }

    fn check(&self, node: &str, request: &AllocationRequest) -> Result<(), Rejected> {
        if self.retired {
            return Err(Rejected::DeviceNotFound {
                node: node.to_string(),
                device: self.device.index,
            });
        }
        if !self.device.healthy {
            return Err(Rejected::DeviceUnhealthy {
                node: node.to_string(),
                device: self.device.index,
            });
        }

        let free_memory = self.device.memory_bytes.saturating_sub(self.used_memory);
        if request.memory_bytes > free_memory {
            return Err(Rejected::InsufficientMemory {
                requested: request.memory_bytes,
                free: free_memory,
            });
        }

        let free_compute = self.device.compute_capacity().saturating_sub(self.used_compute);
        if request.compute_share > free_compute {
            return Err(Rejected::InsufficientCompute {
                requested: request.compute_share,
                free: free_compute,
            });
        }

        Ok(())
    }

    fn insert(&mut self, allocation: Allocation) {
        self.used_memory += allocation.memory_bytes;
        self.used_compute += allocation.compute_share;
        self.allocations.insert(allocation.id, allocation);
        self.version += 1;
    }

    fn remove(&mut self, id: &AllocationId) -> Option<Allocation> {
        let allocation = self.allocations.remove(id)?;
        self.used_memory = self.used_memory.saturating_sub(allocation.memory_bytes);
        self.used_compute = self.used_compute.saturating_sub(allocation.compute_share);
        self.version += 1;
        Some(allocation)
    }

    fn retire(&mut self) -> Vec<AllocationId> {
        self.retired = true;
        self.used_memory = 0;
        self.used_compute = 0;
        self.version += 1;
        self.allocations.drain().map(|(id, _)| id).collect()
    }
}

struct DeviceSlot {
    index: u32,
    state: Mutex<DeviceState>,
}

impl DeviceSlot {
    fn new(device: GpuDevice) -> Self {
        Self {
            index: device.index,
            state: Mutex::new(DeviceState::new(device)),
        }
    }
}

struct NodeEntry {
    devices: Vec<Arc<DeviceSlot>>,
    synced_at: DateTime<Utc>,
}

impl NodeEntry {
    fn slot(&self, index: u32) -> Option<Arc<DeviceSlot>> {
        self.devices.iter().find(|s| s.index == index).cloned()
    }
}

#[derive(Default)]
struct AllocationIndex {
    by_id: HashMap<AllocationId, Allocation>,
    by_pod: HashMap<PodKey, AllocationId>,
}

impl AllocationIndex {
    fn for_pod(&self, pod: &PodKey) -> Option<&Allocation> {
        self.by_pod.get(pod).and_then(|id| self.by_id.get(id))
    }

    fn remove(&mut self, id: &AllocationId) -> Option<Allocation> {
        let allocation = self.by_id.remove(id)?;
        if self.by_pod.get(&allocation.pod) == Some(id) {
            self.by_pod.remove(&allocation.pod);
        }
        Some(allocation)
    }
}

/// In-memory GPU device inventory
///
/// Lock order: node map, then device, then allocation index. Each device has
/// its own lock, so only reservations on the same device contend.
pub struct Inventory {
    config: InventoryConfig,
    nodes: RwLock<BTreeMap<String, Arc<NodeEntry>>>,
    index: Mutex<AllocationIndex>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new(config: InventoryConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(BTreeMap::new()),
            index: Mutex::new(AllocationIndex::default()),
        }
    }

    /// Replace a node's device list, synced now
    pub fn upsert_node(&self, name: &str, devices: Vec<GpuDevice>) -> Vec<Allocation> {
        self.upsert_node_at(name, devices, Utc::now())
    }

    /// Replace a node's device list with an explicit sync time
    ///
    /// Allocations on devices that are still reported survive; allocations on
    /// devices that disappeared are dropped and returned.
    pub fn upsert_node_at(
        &self,
        name: &str,
        devices: Vec<GpuDevice>,
        synced_at: DateTime<Utc>,
    ) -> Vec<Allocation> {
        let mut retired = Vec::new();

        {
            let mut nodes = self.nodes.write();
            let previous = nodes.get(name).cloned();

            let mut slots = Vec::with_capacity(devices.len());
            for device in devices {
                match previous.as_ref().and_then(|p| p.slot(device.index)) {
                    Some(slot) => {
                        {
                            let mut state = slot.state.lock();
                            if device.memory_bytes < state.used_memory {
                                warn!(
                                    "Node {} device {} now reports {} bytes but {} are allocated",
                                    name, device.index, device.memory_bytes, state.used_memory
                                );
                            }
                            state.device = device;
                            state.version += 1;
                        }
                        slots.push(slot);
                    }
                    None => slots.push(Arc::new(DeviceSlot::new(device))),
                }
            }

            if let Some(previous) = previous {
                for slot in &previous.devices {
                    if !slots.iter().any(|s| s.index == slot.index) {
                        retired.extend(slot.state.lock().retire());
                    }
                }
            }

            info!("Synced node {} with {} GPU devices", name, slots.len());

            nodes.insert(
                name.to_string(),
                Arc::new(NodeEntry {
                    devices: slots,
                    synced_at,
                }),
            );
        }

        self.forget(&retired)
    }

    /// Drop a node and every allocation on it
    pub fn remove_node(&self, name: &str) -> Vec<Allocation> {
        let entry = match self.nodes.write().remove(name) {
            Some(entry) => entry,
            None => return Vec::new(),
        };

        let ids: Vec<AllocationId> = entry
            .devices
            .iter()
            .flat_map(|slot| slot.state.lock().retire())
            .collect();

        info!("Removed node {} ({} allocations dropped)", name, ids.len());

        self.forget(&ids)
    }

    fn forget(&self, ids: &[AllocationId]) -> Vec<Allocation> {
        if ids.is_empty() {
            return Vec::new();
        }
        let mut index = self.index.lock();
        let dropped: Vec<Allocation> = ids.iter().filter_map(|id| index.remove(id)).collect();
        for allocation in &dropped {
            warn!(
                "Dropped allocation {} for pod {} (device {}/{} gone)",
                allocation.id, allocation.pod, allocation.node, allocation.device
            );
        }
        dropped
    }

    /// Snapshot every known node
    pub fn snapshot_all(&self) -> InventorySnapshot {
        self.snapshot(&self.node_names())
    }

    /// Aggregate usage across every known node
    pub fn summary(&self) -> InventorySummary {
        self.snapshot_all().summary()
    }

    /// Names of every known node
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    /// All live allocations, ordered by pod
    pub fn allocations(&self) -> Vec<Allocation> {
        let mut allocations: Vec<Allocation> = self.index.lock().by_id.values().cloned().collect();
        allocations.sort_by(|a, b| a.pod.cmp(&b.pod));
        allocations
    }

    fn is_stale(&self, synced_at: DateTime<Utc>) -> bool {
        match self.config.stale_after {
            Some(limit) => Utc::now()
                .signed_duration_since(synced_at)
                .to_std()
                .map(|age| age > limit)
                .unwrap_or(false),
            None => false,
        }
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(InventoryConfig::default())
    }
}

impl DeviceInventory for Inventory {
    fn snapshot(&self, node_names: &[String]) -> InventorySnapshot {
        // Clone the entries first so device locks are never taken under the map lock
        let entries: Vec<(String, Arc<NodeEntry>)> = {
            let nodes = self.nodes.read();
            node_names
                .iter()
                .filter_map(|name| nodes.get(name).map(|e| (name.clone(), e.clone())))
                .collect()
        };

        let mut snapshot = InventorySnapshot::default();
        for (name, entry) in entries {
            let devices = entry
                .devices
                .iter()
                .map(|slot| slot.state.lock().snapshot())
                .collect();

            snapshot.nodes.insert(
                name.clone(),
                NodeSnapshot {
                    name,
                    devices,
                    synced_at: entry.synced_at,
                    stale: self.is_stale(entry.synced_at),
                },
            );
        }
        snapshot
    }

    fn reserve(
        &self,
        node: &str,
        device: u32,
        request: &AllocationRequest,
    ) -> Result<Allocation, Rejected> {
        let entry = self
            .nodes
            .read()
            .get(node)
            .cloned()
            .ok_or_else(|| Rejected::NodeNotFound(node.to_string()))?;

        let slot = entry.slot(device).ok_or_else(|| Rejected::DeviceNotFound {
            node: node.to_string(),
            device,
        })?;

        if let Some(existing) = self.allocation_for(&request.pod) {
            if existing.node == node && existing.device == device {
                debug!("Pod {} already holds {} on {}/{}", request.pod, existing.id, node, device);
                return Ok(existing);
            }
            return Err(Rejected::PodAlreadyAllocated {
                existing: Box::new(existing),
            });
        }

        let mut state = slot
            .state
            .try_lock_for(self.config.reserve_timeout)
            .ok_or_else(|| Rejected::CapacityRace {
                node: node.to_string(),
                device,
            })?;

        state.check(node, request)?;

        let allocation = Allocation::grant(request, node, device);
        state.insert(allocation.clone());

        {
            let mut index = self.index.lock();
            if let Some(existing) = index.for_pod(&request.pod).cloned() {
                // A concurrent reserve for this pod got there first
                state.remove(&allocation.id);
                if existing.node == node && existing.device == device {
                    return Ok(existing);
                }
                return Err(Rejected::PodAlreadyAllocated {
                    existing: Box::new(existing),
                });
            }
            index.by_pod.insert(allocation.pod.clone(), allocation.id);
            index.by_id.insert(allocation.id, allocation.clone());
        }

        debug!(
            "Device {}/{} now at {}/{} bytes, {}/{} compute",
            node,
            device,
            state.used_memory,
            state.device.memory_bytes,
            state.used_compute,
            state.device.compute_capacity()
        );
        drop(state);

        info!(
            "Reserved {} / {} compute on {}/{} for pod {} ({})",
            GpuQuantities::memory_as_quantity(allocation.memory_bytes),
            allocation.compute_share,
            node,
            device,
            allocation.pod,
            allocation.id
        );

        Ok(allocation)
    }

    fn release(&self, id: &AllocationId) -> Option<Allocation> {
        let allocation = match self.index.lock().remove(id) {
            Some(allocation) => allocation,
            None => {
                debug!("Allocation {} already released", id);
                return None;
            }
        };

        let slot = self
            .nodes
            .read()
            .get(&allocation.node)
            .and_then(|entry| entry.slot(allocation.device));

        if let Some(slot) = slot {
            slot.state.lock().remove(id);
        }

        info!(
            "Released allocation {} for pod {} on {}/{}",
            allocation.id, allocation.pod, allocation.node, allocation.device
        );

        Some(allocation)
    }

    fn release_pod(&self, pod: &PodKey) -> Option<Allocation> {
        let id = self.index.lock().by_pod.get(pod).copied()?;
        self.release(&id)
    }

    fn allocation_for(&self, pod: &PodKey) -> Option<Allocation> {
        self.index.lock().for_pod(pod).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Barrier;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn request(pod: &str, memory_gib: u64, compute: u32) -> AllocationRequest {
        AllocationRequest::new(PodKey::new("default", pod), memory_gib * GIB, compute)
    }

    fn create_test_inventory() -> Inventory {
        let inventory = Inventory::default();
        inventory.upsert_node(
            "node1",
            vec![GpuDevice::new(0, 8 * GIB), GpuDevice::new(1, 16 * GIB)],
        );
        inventory
    }

    fn node_names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_reserve_and_release() {
        let inventory = create_test_inventory();

        let allocation = inventory.reserve("node1", 0, &request("a", 2, 30)).unwrap();
        assert_eq!(allocation.node, "node1");
        assert_eq!(allocation.device, 0);

        let snapshot = inventory.snapshot(&node_names(&["node1"]));
        let device = snapshot.get("node1").unwrap().device(0).unwrap();
        assert_eq!(device.used_memory, 2 * GIB);
        assert_eq!(device.used_compute, 30);
        assert_eq!(device.allocations, 1);

        let released = inventory.release(&allocation.id).unwrap();
        assert_eq!(released.id, allocation.id);

        let snapshot = inventory.snapshot(&node_names(&["node1"]));
        let device = snapshot.get("node1").unwrap().device(0).unwrap();
        assert_eq!(device.used_memory, 0);
        assert_eq!(device.used_compute, 0);

        // Releasing twice is a no-op
        assert!(inventory.release(&allocation.id).is_none());
    }

    #[test]
    fn test_reserve_rejections() {
        let inventory = create_test_inventory();
        inventory.upsert_node("sick", vec![GpuDevice {
            healthy: false,
            ..GpuDevice::new(0, 8 * GIB)
        }]);

        assert_eq!(
            inventory.reserve("nope", 0, &request("a", 1, 10)),
            Err(Rejected::NodeNotFound("nope".to_string()))
        );
        assert!(matches!(
            inventory.reserve("node1", 7, &request("a", 1, 10)),
            Err(Rejected::DeviceNotFound { device: 7, .. })
        ));
        assert!(matches!(
            inventory.reserve("node1", 0, &request("a", 9, 10)),
            Err(Rejected::InsufficientMemory { .. })
        ));
        assert!(matches!(
            inventory.reserve("sick", 0, &request("a", 1, 10)),
            Err(Rejected::DeviceUnhealthy { .. })
        ));

        inventory.reserve("node1", 0, &request("b", 1, 80)).unwrap();
        let rejected = inventory.reserve("node1", 0, &request("a", 1, 30)).unwrap_err();
        assert_eq!(
            rejected,
            Rejected::InsufficientCompute {
                requested: 30,
                free: 20
            }
        );
        assert!(rejected.is_retryable());

        // Nothing leaked from the rejected attempts
        assert_eq!(inventory.allocations().len(), 1);
    }

    #[test]
    fn test_reserve_is_idempotent_per_pod() {
        let inventory = create_test_inventory();

        let first = inventory.reserve("node1", 1, &request("a", 4, 50)).unwrap();
        let again = inventory.reserve("node1", 1, &request("a", 4, 50)).unwrap();
        assert_eq!(first.id, again.id);

        let elsewhere = inventory.reserve("node1", 0, &request("a", 4, 50)).unwrap_err();
        assert!(matches!(elsewhere, Rejected::PodAlreadyAllocated { .. }));
        assert!(!elsewhere.is_retryable());

        let snapshot = inventory.snapshot(&node_names(&["node1"]));
        assert_eq!(snapshot.get("node1").unwrap().device(1).unwrap().used_compute, 50);
        assert_eq!(snapshot.get("node1").unwrap().device(0).unwrap().used_compute, 0);
    }

    #[test]
    fn test_concurrent_reserve_same_pod_same_device() {
        let inventory = Arc::new(Inventory::default());
        inventory.upsert_node("node1", vec![GpuDevice::new(0, 16 * GIB)]);

        const N: usize = 8;
        let barrier = Barrier::new(N);
        let req = request("a", 1, 10);

        let results: Vec<Result<Allocation, Rejected>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..N)
                .map(|_| {
                    let inventory = &inventory;
                    let barrier = &barrier;
                    let req = &req;
                    s.spawn(move || {
                        barrier.wait();
                        inventory.reserve("node1", 0, req)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Every caller either gets the one allocation or lost the device lock
        let granted: Vec<&Allocation> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert!(!granted.is_empty());
        assert!(granted.iter().all(|a| a.id == granted[0].id));
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Rejected::CapacityRace { .. })));

        let snapshot = inventory.snapshot(&node_names(&["node1"]));
        let device = snapshot.get("node1").unwrap().device(0).unwrap();
        assert_eq!(device.allocations, 1);
        assert_eq!(device.used_compute, 10);
    }

    #[test]
    fn test_release_pod() {
        let inventory = create_test_inventory();
        let allocation = inventory.reserve("node1", 1, &request("a", 4, 50)).unwrap();

        assert_eq!(inventory.allocation_for(&allocation.pod), Some(allocation.clone()));
        assert_eq!(inventory.release_pod(&allocation.pod).map(|a| a.id), Some(allocation.id));
        assert!(inventory.allocation_for(&allocation.pod).is_none());
        assert!(inventory.release_pod(&allocation.pod).is_none());
    }

    #[test]
    fn test_upsert_keeps_surviving_allocations() {
        let inventory = create_test_inventory();
        let kept = inventory.reserve("node1", 0, &request("a", 1, 10)).unwrap();
        let lost = inventory.reserve("node1", 1, &request("b", 1, 10)).unwrap();

        // Device 1 disappears, device 2 appears
        let dropped = inventory.upsert_node(
            "node1",
            vec![GpuDevice::new(0, 8 * GIB), GpuDevice::new(2, 8 * GIB)],
        );
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, lost.id);

        assert!(inventory.allocation_for(&kept.pod).is_some());
        assert!(inventory.allocation_for(&lost.pod).is_none());

        let snapshot = inventory.snapshot(&node_names(&["node1"]));
        let node = snapshot.get("node1").unwrap();
        assert_eq!(node.devices.len(), 2);
        assert_eq!(node.device(0).unwrap().used_compute, 10);
        assert_eq!(node.device(2).unwrap().used_compute, 0);
    }

    #[test]
    fn test_remove_node() {
        let inventory = create_test_inventory();
        let allocation = inventory.reserve("node1", 0, &request("a", 1, 10)).unwrap();

        let dropped = inventory.remove_node("node1");
        assert_eq!(dropped.len(), 1);
        assert!(inventory.release(&allocation.id).is_none());
        assert!(inventory.snapshot(&node_names(&["node1"])).get("node1").is_none());
        assert!(inventory.remove_node("node1").is_empty());
    }

    #[test]
    fn test_summary() {
        let inventory = create_test_inventory();
        inventory.reserve("node1", 1, &request("a", 4, 50)).unwrap();

        let summary = inventory.summary();
        assert_eq!(summary.nodes, 1);
        assert_eq!(summary.devices, 2);
        assert_eq!(summary.healthy_devices, 2);
        assert_eq!(summary.allocations, 1);
        assert_eq!(summary.total_memory, 24 * GIB);
        assert_eq!(summary.used_memory, 4 * GIB);
        assert_eq!(summary.total_compute, 200);
        assert_eq!(summary.used_compute, 50);
    }

    #[test]
    fn test_snapshot_skips_unknown_and_marks_stale() {
        let inventory = Inventory::new(InventoryConfig {
            stale_after: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        inventory.upsert_node("fresh", vec![GpuDevice::new(0, 8 * GIB)]);
        inventory.upsert_node_at(
            "old",
            vec![GpuDevice::new(0, 8 * GIB)],
            Utc::now() - chrono::Duration::minutes(5),
        );

        let snapshot = inventory.snapshot(&node_names(&["fresh", "old", "missing"]));
        assert_eq!(snapshot.nodes.len(), 2);
        assert!(!snapshot.get("fresh").unwrap().stale);
        assert!(snapshot.get("old").unwrap().stale);
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn test_concurrent_full_capacity_reservations() {
        let inventory = Arc::new(Inventory::default());
        inventory.upsert_node("node1", vec![GpuDevice::new(0, 8 * GIB)]);

        const N: usize = 16;
        let barrier = Barrier::new(N);

        let results: Vec<Result<Allocation, Rejected>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..N)
                .map(|i| {
                    let inventory = &inventory;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        inventory.reserve("node1", 0, &request(&format!("pod-{}", i), 8, 100))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_retryable()));
    }

    #[test]
    fn test_random_reserve_release_never_overcommits() {
        let inventory = Arc::new(Inventory::default());
        inventory.upsert_node(
            "node1",
            vec![GpuDevice::new(0, 8 * GIB), GpuDevice::new(1, 4 * GIB)],
        );
        inventory.upsert_node("node2", vec![GpuDevice::new(0, 8 * GIB)]);

        let targets = [("node1", 0u32), ("node1", 1), ("node2", 0)];

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let inventory = &inventory;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t);
                    let mut held: Vec<AllocationId> = Vec::new();

                    for i in 0..500 {
                        if rng.gen_range(0..3) == 0 && !held.is_empty() {
                            let id = held.swap_remove(rng.gen_range(0..held.len()));
                            inventory.release(&id);
                        } else {
                            let (node, device) = targets[rng.gen_range(0..targets.len())];
                            let req = request(
                                &format!("t{}-{}", t, i),
                                rng.gen_range(1..=3),
                                rng.gen_range(0..40),
                            );
                            if let Ok(allocation) = inventory.reserve(node, device, &req) {
                                held.push(allocation.id);
                            }
                        }

                        for node in inventory.snapshot_all().nodes.values() {
                            for device in &node.devices {
                                assert!(device.used_memory <= device.device.memory_bytes);
                                assert!(device.used_compute <= 100);
                            }
                        }
                    }
                });
            }
        });

        // Device counters agree with the allocation index
        let snapshot = inventory.snapshot_all();
        let allocations = inventory.allocations();
        for node in snapshot.nodes.values() {
            for device in &node.devices {
                let (memory, compute) = allocations
                    .iter()
                    .filter(|a| a.node == node.name && a.device == device.device.index)
                    .fold((0u64, 0u32), |(m, c), a| (m + a.memory_bytes, c + a.compute_share));
                assert_eq!(device.used_memory, memory);
                assert_eq!(device.used_compute, compute);
            }
        }
    }
}
