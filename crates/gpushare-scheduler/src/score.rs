use crate::inventory::{InventorySnapshot, NodeSnapshot};
use crate::types::{rank, ScoreResult};
use gpushare_core::AllocationRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Scoring function trait
pub trait ScoreFunction: Send + Sync {
    /// Score a node for the given request (0-100, higher is better)
    fn score(&self, request: &AllocationRequest, node: &NodeSnapshot) -> ScoreResult;

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// Compute-share utilization of a node's healthy devices, 0-100
fn utilization(node: &NodeSnapshot) -> i64 {
    let total = node.total_compute();
    if total == 0 {
        return 0;
    }
    let used = node.used_compute() as f64;
    ((used * 100.0 / total as f64).round() as i64).clamp(0, 100)
}

/// Prefer the fullest nodes so whole devices stay free for large requests
pub struct BinPacking;

impl ScoreFunction for BinPacking {
    fn score(&self, _request: &AllocationRequest, node: &NodeSnapshot) -> ScoreResult {
        let score = utilization(node);
        debug!("Node {} bin-packing score: {}", node.name, score);
        ScoreResult::new(node.name.clone(), score)
    }

    fn name(&self) -> &str {
        "BinPacking"
    }
}

/// Prefer the emptiest nodes
pub struct Spread;

impl ScoreFunction for Spread {
    fn score(&self, _request: &AllocationRequest, node: &NodeSnapshot) -> ScoreResult {
        let score = 100 - utilization(node);
        debug!("Node {} spread score: {}", node.name, score);
        ScoreResult::new(node.name.clone(), score)
    }

    fn name(&self) -> &str {
        "Spread"
    }
}

/// Node scoring policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringPolicy {
    #[default]
    BinPack,
    Spread,
}

impl ScoringPolicy {
    fn scorer(self) -> Box<dyn ScoreFunction> {
        match self {
            ScoringPolicy::BinPack => Box::new(BinPacking),
            ScoringPolicy::Spread => Box::new(Spread),
        }
    }
}

impl fmt::Display for ScoringPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringPolicy::BinPack => f.write_str("binpack"),
            ScoringPolicy::Spread => f.write_str("spread"),
        }
    }
}

impl FromStr for ScoringPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binpack" | "bin-pack" => Ok(ScoringPolicy::BinPack),
            "spread" => Ok(ScoringPolicy::Spread),
            other => Err(format!(
                "unknown scoring policy '{}', expected 'binpack' or 'spread'",
                other
            )),
        }
    }
}

/// Ranks feasible nodes under one policy
pub struct ScoringEngine {
    scorer: Box<dyn ScoreFunction>,
}

impl ScoringEngine {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self {
            scorer: policy.scorer(),
        }
    }

    /// Score every node, ranked by score then name
    ///
    /// The output holds exactly the input nodes; nodes missing from the
    /// snapshot score 0.
    pub fn score(
        &self,
        nodes: &[String],
        request: &AllocationRequest,
        snapshot: &InventorySnapshot,
    ) -> Vec<ScoreResult> {
        let mut scores: Vec<ScoreResult> = nodes
            .iter()
            .map(|name| match snapshot.get(name) {
                Some(node) => self.scorer.score(request, node),
                None => ScoreResult::new(name.clone(), 0),
            })
            .collect();

        rank(&mut scores);

        debug!(
            "{} ranked {} nodes for pod {}",
            self.scorer.name(),
            scores.len(),
            request.pod
        );

        scores
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringPolicy::default())
    }
}

/// Pick the device on a node that should host the request
///
/// The hinted device when it fits, otherwise the fitting device with the most
/// compute share already in use, lowest index first on ties.
pub fn select_device(node: &NodeSnapshot, request: &AllocationRequest) -> Option<u32> {
    if let Some(hint) = request.device_hint {
        return node
            .device(hint)
            .filter(|d| d.fits(request).is_ok())
            .map(|d| d.device.index);
    }

    node.devices
        .iter()
        .filter(|d| d.fits(request).is_ok())
        .max_by(|a, b| {
            a.used_compute
                .cmp(&b.used_compute)
                .then_with(|| b.device.index.cmp(&a.device.index))
        })
        .map(|d| d.device.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{DeviceInventory, Inventory};
    use gpushare_core::{GpuDevice, PodKey};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn request(pod: &str, memory_gib: u64, compute: u32) -> AllocationRequest {
        AllocationRequest::new(PodKey::new("default", pod), memory_gib * GIB, compute)
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn create_test_inventory() -> Inventory {
        let inventory = Inventory::default();
        inventory.upsert_node("node-a", vec![GpuDevice::new(0, 8 * GIB)]);
        inventory.upsert_node(
            "node-b",
            vec![GpuDevice::new(0, 8 * GIB), GpuDevice::new(1, 8 * GIB)],
        );
        inventory.reserve("node-b", 0, &request("x", 1, 40)).unwrap();
        inventory.reserve("node-b", 1, &request("y", 1, 20)).unwrap();
        inventory
    }

    #[test]
    fn test_bin_packing() {
        let inventory = create_test_inventory();
        let nodes = names(&["node-a", "node-b"]);
        let snapshot = inventory.snapshot(&nodes);

        let scores = ScoringEngine::default().score(&nodes, &request("p", 1, 10), &snapshot);

        // node-b: 60 of 200 in use
        assert_eq!(scores[0], ScoreResult::new("node-b".to_string(), 30));
        assert_eq!(scores[1], ScoreResult::new("node-a".to_string(), 0));
    }

    #[test]
    fn test_spread() {
        let inventory = create_test_inventory();
        let nodes = names(&["node-b", "node-a"]);
        let snapshot = inventory.snapshot(&nodes);

        let scores =
            ScoringEngine::new(ScoringPolicy::Spread).score(&nodes, &request("p", 1, 10), &snapshot);

        assert_eq!(scores[0], ScoreResult::new("node-a".to_string(), 100));
        assert_eq!(scores[1], ScoreResult::new("node-b".to_string(), 70));
    }

    #[test]
    fn test_score_covers_exactly_input_and_is_deterministic() {
        let inventory = create_test_inventory();
        let nodes = names(&["node-a", "ghost", "node-b"]);
        let snapshot = inventory.snapshot(&nodes);
        let engine = ScoringEngine::default();

        let first = engine.score(&nodes, &request("p", 1, 10), &snapshot);
        let second = engine.score(&nodes, &request("p", 1, 10), &snapshot);
        assert_eq!(first, second);

        let mut scored: Vec<String> = first.into_iter().map(|s| s.node_name).collect();
        scored.sort();
        assert_eq!(scored, names(&["ghost", "node-a", "node-b"]));
    }

    #[test]
    fn test_select_device_best_fit() {
        let inventory = create_test_inventory();
        let snapshot = inventory.snapshot(&names(&["node-b"]));
        let node = snapshot.get("node-b").unwrap();

        assert_eq!(select_device(node, &request("p", 1, 10)), Some(0));
        // Device 0 has only 60 free
        assert_eq!(select_device(node, &request("p", 1, 70)), Some(1));
        assert_eq!(select_device(node, &request("p", 1, 10).with_device_hint(1)), Some(1));
        assert_eq!(select_device(node, &request("p", 1, 70).with_device_hint(0)), None);
        assert_eq!(select_device(node, &request("p", 1, 90)), None);
    }

    #[test]
    fn test_select_device_ties_prefer_lowest_index() {
        let inventory = Inventory::default();
        inventory.upsert_node(
            "n",
            vec![GpuDevice::new(2, 8 * GIB), GpuDevice::new(1, 8 * GIB)],
        );
        let snapshot = inventory.snapshot(&names(&["n"]));

        assert_eq!(select_device(snapshot.get("n").unwrap(), &request("p", 1, 10)), Some(1));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("binpack".parse::<ScoringPolicy>(), Ok(ScoringPolicy::BinPack));
        assert_eq!("Spread".parse::<ScoringPolicy>(), Ok(ScoringPolicy::Spread));
        assert!("random".parse::<ScoringPolicy>().is_err());
        assert_eq!(ScoringPolicy::Spread.to_string(), "spread");
    }
}
