use crate::quantities::GpuQuantities;
use crate::{GpuDevice, GpushareError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A device as reported by a node (memory as a quantity string)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// Device index on the node
    pub index: u32,
    /// Total memory, e.g. "16Gi"
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

/// A node and its devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

impl NodeSpec {
    /// Convert the reported devices, validating indices and memory
    pub fn to_devices(&self) -> Result<Vec<GpuDevice>> {
        devices_from_specs(&self.name, &self.devices)
    }
}

/// Convert device specs for a node, rejecting duplicate indices and zero memory
pub fn devices_from_specs(node: &str, specs: &[DeviceSpec]) -> Result<Vec<GpuDevice>> {
    let mut seen = HashSet::new();
    let mut devices = Vec::with_capacity(specs.len());

    for spec in specs {
        if !seen.insert(spec.index) {
            return Err(GpushareError::validation_failed(
                "Node",
                format!("node {} reports device index {} twice", node, spec.index),
                "Each device on a node needs a unique index",
            ));
        }

        let memory_bytes = GpuQuantities::parse_memory(&spec.memory)?;
        if memory_bytes == 0 {
            return Err(GpushareError::validation_failed(
                "Node",
                format!("device {} on node {} has zero memory", spec.index, node),
                "Report the device's total memory, e.g. 16Gi",
            ));
        }

        devices.push(GpuDevice {
            index: spec.index,
            uuid: spec.uuid.clone(),
            memory_bytes,
            healthy: spec.healthy,
        });
    }

    // Ordered sequence of devices
    devices.sort_by_key(|d| d.index);

    Ok(devices)
}

/// Inventory seed file
///
/// ```yaml
/// nodes:
///   - name: gpu-node-1
///     devices:
///       - index: 0
///         memory: 16Gi
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl InventoryFile {
    /// Parse an inventory document
    pub fn from_yaml(data: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(data).map_err(|e| {
            GpushareError::serialization_error(
                format!("Failed to parse inventory YAML: {}", e),
                Some(Box::new(e)),
            )
        })?;
        file.validate()?;
        Ok(file)
    }

    /// Read and parse an inventory file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            GpushareError::config_error(
                format!("Failed to read inventory file '{}': {}", path.display(), e),
                Some(Box::new(e)),
            )
        })?;
        Self::from_yaml(&data)
    }

    /// Check node names are unique and every device converts
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(GpushareError::validation_failed(
                    "Inventory",
                    "node with empty name",
                    "Give every node a name matching its Kubernetes node name",
                ));
            }
            if !names.insert(node.name.as_str()) {
                return Err(GpushareError::validation_failed(
                    "Inventory",
                    format!("node {} listed twice", node.name),
                    "Merge the device lists into one entry",
                ));
            }
            node.to_devices()?;
        }
        Ok(())
    }
}
