use crate::inventory::{DeviceInventory, Rejected};
use crate::{Result, SchedulerError};
use gpushare_core::{Allocation, AllocationId, AllocationRequest, PodKey};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Commits a chosen (pod, node, device) into the inventory
pub struct Binder {
    inventory: Arc<dyn DeviceInventory>,
    in_flight: Mutex<HashSet<PodKey>>,
}

/// Marks a pod as being bound until dropped
struct InFlight<'a> {
    binder: &'a Binder,
    pod: PodKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.binder.in_flight.lock().remove(&self.pod);
    }
}

impl Binder {
    pub fn new(inventory: Arc<dyn DeviceInventory>) -> Self {
        Self {
            inventory,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn begin(&self, pod: &PodKey, node: &str, device: u32) -> Result<InFlight<'_>> {
        if !self.in_flight.lock().insert(pod.clone()) {
            warn!("Pod {} already has a bind in flight", pod);
            return Err(SchedulerError::capacity_race(
                pod.to_string(),
                node,
                device,
                "another bind for this pod is in flight",
            ));
        }
        Ok(InFlight {
            binder: self,
            pod: pod.clone(),
        })
    }

    /// Re-validate against the current inventory and reserve
    pub fn bind(&self, request: &AllocationRequest, node: &str, device: u32) -> Result<Allocation> {
        let _guard = self.begin(&request.pod, node, device)?;

        if let Some(existing) = self.inventory.allocation_for(&request.pod) {
            if existing.node == node && existing.device == device {
                info!("Pod {} already bound to {}/{}", request.pod, node, device);
                return Ok(existing);
            }
            return Err(SchedulerError::AlreadyBound {
                pod: request.pod.to_string(),
                node: existing.node,
                device: existing.device,
            });
        }

        let snapshot = self.inventory.snapshot(&[node.to_string()]);
        let target = snapshot
            .get(node)
            .ok_or_else(|| self.inconsistent(format!("node {} not found", node)))?
            .device(device)
            .ok_or_else(|| {
                self.inconsistent(format!("device {} not found on node {}", device, node))
            })?;

        if let Err(reason) = target.fits(request) {
            warn!(
                "Node {} device {} no longer fits pod {}: {}",
                node, device, request.pod, reason
            );
            return Err(SchedulerError::capacity_race(
                request.pod.to_string(),
                node,
                device,
                reason.to_string(),
            ));
        }

        let allocation = self
            .inventory
            .reserve(node, device, request)
            .map_err(|rejected| self.translate(request, node, device, rejected))?;

        info!(
            "Bound pod {} to {}/{} (allocation {})",
            request.pod, node, device, allocation.id
        );

        Ok(allocation)
    }

    /// Undo an allocation whose downstream binding failed
    pub fn unbind(&self, id: &AllocationId) -> Option<Allocation> {
        self.inventory.release(id)
    }

    fn inconsistent(&self, message: String) -> SchedulerError {
        error!("Inventory inconsistency: {}", message);
        SchedulerError::inventory_inconsistency(message)
    }

    fn translate(
        &self,
        request: &AllocationRequest,
        node: &str,
        device: u32,
        rejected: Rejected,
    ) -> SchedulerError {
        match rejected {
            Rejected::NodeNotFound(_) | Rejected::DeviceNotFound { .. } => {
                self.inconsistent(rejected.to_string())
            }
            Rejected::PodAlreadyAllocated { existing } => SchedulerError::AlreadyBound {
                pod: request.pod.to_string(),
                node: existing.node,
                device: existing.device,
            },
            other => {
                warn!(
                    "Reservation for pod {} on {}/{} rejected: {}",
                    request.pod, node, device, other
                );
                SchedulerError::capacity_race(request.pod.to_string(), node, device, other.to_string())
            }
        }
    }
}
