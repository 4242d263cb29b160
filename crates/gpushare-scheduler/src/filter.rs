use crate::inventory::{InventorySnapshot, NodeSnapshot};
use crate::types::{ExclusionReason, FilterOutcome, FilterResult};
use gpushare_core::AllocationRequest;
use tracing::debug;

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Filter a node for the given request
    fn filter(&self, request: &AllocationRequest, node: &NodeSnapshot) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Node has a fresh inventory with at least one device
pub struct NodeKnown;

impl FilterPredicate for NodeKnown {
    fn filter(&self, _request: &AllocationRequest, node: &NodeSnapshot) -> FilterResult {
        if node.devices.is_empty() || node.stale {
            return FilterResult::fail(node.name.clone(), ExclusionReason::NodeUnknown);
        }
        FilterResult::pass(node.name.clone())
    }

    fn name(&self) -> &str {
        "NodeKnown"
    }
}

/// Node has at least one healthy device
pub struct HealthyDevice;

impl FilterPredicate for HealthyDevice {
    fn filter(&self, _request: &AllocationRequest, node: &NodeSnapshot) -> FilterResult {
        if node.healthy_devices().next().is_none() {
            return FilterResult::fail(node.name.clone(), ExclusionReason::NoHealthyDevice);
        }
        FilterResult::pass(node.name.clone())
    }

    fn name(&self) -> &str {
        "HealthyDevice"
    }
}

/// Some healthy device (the hinted one, if any) can host the request
pub struct DeviceFits;

impl FilterPredicate for DeviceFits {
    fn filter(&self, request: &AllocationRequest, node: &NodeSnapshot) -> FilterResult {
        if let Some(hint) = request.device_hint {
            return match node.device(hint).map(|d| d.fits(request)) {
                Some(Ok(())) => FilterResult::pass(node.name.clone()),
                _ => FilterResult::fail(
                    node.name.clone(),
                    ExclusionReason::DeviceHintUnsatisfiable,
                ),
            };
        }

        let mut memory_fits = false;
        for device in node.healthy_devices() {
            match device.fits(request) {
                Ok(()) => return FilterResult::pass(node.name.clone()),
                Err(ExclusionReason::InsufficientCompute) => memory_fits = true,
                Err(_) => {}
            }
        }

        debug!(
            "Node {} cannot host {} bytes / {} compute",
            node.name, request.memory_bytes, request.compute_share
        );

        // Report compute only when memory would have fit somewhere
        let reason = if memory_fits {
            ExclusionReason::InsufficientCompute
        } else {
            ExclusionReason::InsufficientMemory
        };
        FilterResult::fail(node.name.clone(), reason)
    }

    fn name(&self) -> &str {
        "DeviceFits"
    }
}

/// Get default filter predicates
pub fn default_filters() -> Vec<Box<dyn FilterPredicate>> {
    vec![Box::new(NodeKnown), Box::new(HealthyDevice), Box::new(DeviceFits)]
}

/// Runs predicates over a candidate list
pub struct FeasibilityFilter {
    filters: Vec<Box<dyn FilterPredicate>>,
}

impl FeasibilityFilter {
    pub fn new(filters: Vec<Box<dyn FilterPredicate>>) -> Self {
        Self { filters }
    }

    /// Split candidates into feasible nodes (input order kept) and excluded ones
    pub fn filter(
        &self,
        candidates: &[String],
        request: &AllocationRequest,
        snapshot: &InventorySnapshot,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        for name in candidates {
            let node = match snapshot.get(name) {
                Some(node) => node,
                None => {
                    debug!("Node {} has no inventory", name);
                    outcome
                        .failed
                        .insert(name.clone(), ExclusionReason::NodeUnknown);
                    continue;
                }
            };

            let failed = self
                .filters
                .iter()
                .map(|f| (f.name(), f.filter(request, node)))
                .find(|(_, result)| !result.passed);

            match failed {
                Some((filter, result)) => {
                    let reason = result.reason.unwrap_or(ExclusionReason::NodeUnknown);
                    debug!("Node {} failed {}: {}", name, filter, reason);
                    outcome.failed.insert(name.clone(), reason);
                }
                None => {
                    // Duplicate candidate names collapse to one entry
                    if !outcome.nodes.contains(name) {
                        outcome.nodes.push(name.clone());
                    }
                }
            }
        }

        outcome
    }
}

impl Default for FeasibilityFilter {
    fn default() -> Self {
        Self::new(default_filters())
    }
}
