use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why a node was excluded by the feasibility filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExclusionReason {
    /// Node has no devices, or its inventory is stale or missing
    NodeUnknown,
    /// Every device on the node is unhealthy
    NoHealthyDevice,
    /// No device has enough free memory
    InsufficientMemory,
    /// Some device has enough memory, but none has enough compute share
    InsufficientCompute,
    /// The hinted device is missing or cannot host the request
    DeviceHintUnsatisfiable,
}

impl ExclusionReason {
    /// Whether evicting pods from the node could never make it feasible
    pub fn is_unresolvable(self) -> bool {
        matches!(
            self,
            ExclusionReason::NodeUnknown | ExclusionReason::NoHealthyDevice
        )
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ExclusionReason::NodeUnknown => "NodeUnknown: no current GPU inventory for node",
            ExclusionReason::NoHealthyDevice => "NoHealthyDevice: all GPUs on node are unhealthy",
            ExclusionReason::InsufficientMemory => {
                "InsufficientMemory: no GPU has enough free memory"
            }
            ExclusionReason::InsufficientCompute => {
                "InsufficientCompute: no GPU has enough free compute share"
            }
            ExclusionReason::DeviceHintUnsatisfiable => {
                "DeviceHintUnsatisfiable: requested GPU cannot host the pod"
            }
        };
        f.write_str(msg)
    }
}

/// Result of filtering a node
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Node name
    pub node_name: String,
    /// Whether the node passed the filter
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<ExclusionReason>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(node_name: String) -> Self {
        Self {
            node_name,
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(node_name: String, reason: ExclusionReason) -> Self {
        Self {
            node_name,
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Outcome of filtering a candidate list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Feasible nodes, in candidate order
    pub nodes: Vec<String>,
    /// Excluded nodes and why
    pub failed: BTreeMap<String, ExclusionReason>,
}

impl FilterOutcome {
    /// Whether no node survived
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Failed nodes rendered as protocol messages, split into
    /// (resolvable by preemption, unresolvable)
    pub fn failed_messages(&self) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let (unresolvable, resolvable): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .failed
            .iter()
            .map(|(node, reason)| (node.clone(), *reason))
            .partition(|(_, reason)| reason.is_unresolvable());

        let render = |map: BTreeMap<String, ExclusionReason>| {
            map.into_iter()
                .map(|(node, reason)| (node, reason.to_string()))
                .collect::<BTreeMap<_, _>>()
        };

        (render(resolvable), render(unresolvable))
    }
}

/// Result of scoring a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    /// Node name
    pub node_name: String,
    /// Score (0-100, higher is better)
    pub score: i64,
}

impl ScoreResult {
    /// Create a new score result
    pub fn new(node_name: String, score: i64) -> Self {
        Self { node_name, score }
    }
}

/// Sort by score descending, then node name ascending
pub fn rank(scores: &mut [ScoreResult]) {
    scores.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.node_name.cmp(&b.node_name))
    });
}
