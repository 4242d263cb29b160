//! kube-scheduler extender wire types (`extender/v1`)

use gpushare_core::{Node, Pod};
use gpushare_scheduler::ScoreResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error returned when the scheduler sends neither `nodenames` nor `nodes`
pub const NODE_CACHE_REQUIRED: &str =
    "gpushare extender must be configured with nodeCacheCapable=true";

/// Node list as sent by the scheduler when it is not node-cache capable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeItems {
    #[serde(default)]
    pub items: Vec<Node>,
}

impl NodeItems {
    fn names(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect()
    }

    /// Keep only the named nodes, in the given order
    fn select(self, names: &[String]) -> Self {
        let mut by_name: BTreeMap<String, Node> = self
            .items
            .into_iter()
            .filter_map(|n| n.metadata.name.clone().map(|name| (name, n)))
            .collect();

        Self {
            items: names.iter().filter_map(|name| by_name.remove(name)).collect(),
        }
    }
}

/// Arguments of the filter and prioritize calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderArgs {
    #[serde(default)]
    pub pod: Option<Pod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeItems>,
    #[serde(default, rename = "nodenames", skip_serializing_if = "Option::is_none")]
    pub node_names: Option<Vec<String>>,
}

impl ExtenderArgs {
    /// Candidate node names, preferring `nodenames`
    pub fn candidates(&self) -> Option<Vec<String>> {
        match (&self.node_names, &self.nodes) {
            (Some(names), _) => Some(names.clone()),
            (None, Some(nodes)) => Some(nodes.names()),
            (None, None) => None,
        }
    }
}

/// Response of the filter call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderFilterResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeItems>,
    #[serde(default, rename = "nodenames", skip_serializing_if = "Option::is_none")]
    pub node_names: Option<Vec<String>>,
    #[serde(default, rename = "failedNodes")]
    pub failed_nodes: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "failedAndUnresolvableNodes",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub failed_and_unresolvable_nodes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ExtenderFilterResult {
    /// A result carrying only an error
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }

    /// Answer with `feasible` in the same shape the scheduler asked with
    pub fn feasible(
        args: ExtenderArgs,
        feasible: Vec<String>,
        failed_nodes: BTreeMap<String, String>,
        failed_and_unresolvable_nodes: BTreeMap<String, String>,
    ) -> Self {
        let (nodes, node_names) = match (args.node_names, args.nodes) {
            (Some(_), _) | (None, None) => (None, Some(feasible)),
            (None, Some(items)) => (Some(items.select(&feasible)), None),
        };

        Self {
            nodes,
            node_names,
            failed_nodes,
            failed_and_unresolvable_nodes,
            error: String::new(),
        }
    }
}

/// Score of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}

impl From<ScoreResult> for HostPriority {
    fn from(result: ScoreResult) -> Self {
        Self {
            host: result.node_name,
            score: result.score,
        }
    }
}

/// Response of the prioritize call
pub type HostPriorityList = Vec<HostPriority>;

/// Arguments of the bind call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderBindingArgs {
    #[serde(default, rename = "podName")]
    pub pod_name: String,
    #[serde(default, rename = "podNamespace")]
    pub pod_namespace: String,
    #[serde(default, rename = "podUID")]
    pub pod_uid: String,
    #[serde(default)]
    pub node: String,
}

/// Response of the bind call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderBindingResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    #[test]
    fn test_candidates_prefer_node_names() {
        let args: ExtenderArgs = serde_json::from_value(json!({
            "pod": {"metadata": {"name": "p"}},
            "nodenames": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(args.candidates(), Some(vec!["a".to_string(), "b".to_string()]));

        let args = ExtenderArgs {
            nodes: Some(NodeItems {
                items: vec![node("x"), node("y")],
            }),
            ..Default::default()
        };
        assert_eq!(args.candidates(), Some(vec!["x".to_string(), "y".to_string()]));

        assert_eq!(ExtenderArgs::default().candidates(), None);
    }

    #[test]
    fn test_feasible_answers_in_request_shape() {
        let args = ExtenderArgs {
            nodes: Some(NodeItems {
                items: vec![node("x"), node("y"), node("z")],
            }),
            ..Default::default()
        };
        let result = ExtenderFilterResult::feasible(
            args,
            vec!["z".to_string(), "x".to_string()],
            BTreeMap::new(),
            BTreeMap::new(),
        );

        assert!(result.node_names.is_none());
        let names: Vec<_> = result
            .nodes
            .unwrap()
            .items
            .into_iter()
            .filter_map(|n| n.metadata.name)
            .collect();
        assert_eq!(names, vec!["z", "x"]);
    }

    #[test]
    fn test_wire_field_names() {
        let mut failed = BTreeMap::new();
        failed.insert("b".to_string(), "InsufficientMemory".to_string());
        let result = ExtenderFilterResult {
            node_names: Some(vec!["a".to_string()]),
            failed_nodes: failed,
            ..Default::default()
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["nodenames"], json!(["a"]));
        assert_eq!(value["failedNodes"]["b"], "InsufficientMemory");
        assert!(value.get("error").is_none());
        assert!(value.get("failedAndUnresolvableNodes").is_none());

        let args: ExtenderBindingArgs = serde_json::from_value(json!({
            "podName": "p",
            "podNamespace": "ns",
            "podUID": "uid-1",
            "node": "n1"
        }))
        .unwrap();
        assert_eq!(args.pod_uid, "uid-1");
        assert_eq!(args.node, "n1");
    }
}
