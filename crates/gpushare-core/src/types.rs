use crate::quantities::{GpuQuantities, COMPUTE_SHARE_CAPACITY};
use crate::{GpushareError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// PodKey identifies a pod by namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    /// Namespace (empty string is treated as "default")
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodKey {
    /// Create a new pod key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                "default".to_string()
            } else {
                namespace
            },
            name: name.into(),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A physical GPU device on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    /// Device index on the node
    pub index: u32,
    /// Vendor UUID, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Total memory in bytes
    pub memory_bytes: u64,
    /// Whether the device is healthy and may receive new allocations
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

impl GpuDevice {
    /// Create a healthy device
    pub fn new(index: u32, memory_bytes: u64) -> Self {
        Self {
            index,
            uuid: None,
            memory_bytes,
            healthy: true,
        }
    }

    /// Compute-share capacity of this device
    pub fn compute_capacity(&self) -> u32 {
        COMPUTE_SHARE_CAPACITY
    }
}

/// A GPU share request for one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    /// Pod the request belongs to
    pub pod: PodKey,
    /// Requested GPU memory in bytes
    pub memory_bytes: u64,
    /// Requested compute share (0-100)
    pub compute_share: u32,
    /// Preferred device index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hint: Option<u32>,
}

impl AllocationRequest {
    /// Create a new request without a device hint
    pub fn new(pod: PodKey, memory_bytes: u64, compute_share: u32) -> Self {
        Self {
            pod,
            memory_bytes,
            compute_share,
            device_hint: None,
        }
    }

    /// Set the device hint
    pub fn with_device_hint(mut self, index: u32) -> Self {
        self.device_hint = Some(index);
        self
    }

    /// Requested quantities
    pub fn quantities(&self) -> GpuQuantities {
        GpuQuantities {
            memory_bytes: self.memory_bytes,
            compute_share: self.compute_share,
        }
    }

    /// Validate the request shape
    pub fn validate(&self) -> Result<()> {
        if self.pod.name.is_empty() {
            return Err(GpushareError::invalid_request(
                self.pod.to_string(),
                "pod has no name",
                "Set metadata.name on the pod",
            ));
        }

        if self.quantities().is_zero() {
            return Err(GpushareError::invalid_request(
                self.pod.to_string(),
                "pod requests no GPU share",
                "Set gpushare.io/gpu-memory or gpushare.io/gpu-core in the container limits",
            ));
        }

        if self.compute_share > COMPUTE_SHARE_CAPACITY {
            return Err(GpushareError::invalid_request(
                self.pod.to_string(),
                format!(
                    "compute share {} exceeds device capacity {}",
                    self.compute_share, COMPUTE_SHARE_CAPACITY
                ),
                "A pod can use at most one whole device",
            ));
        }

        Ok(())
    }
}

/// Unique allocation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId(pub Uuid);

impl AllocationId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A granted GPU share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: AllocationId,
    pub pod: PodKey,
    pub node: String,
    pub device: u32,
    pub memory_bytes: u64,
    pub compute_share: u32,
    pub created_at: DateTime<Utc>,
}

impl Allocation {
    /// Grant the full request on the given node and device
    pub fn grant(request: &AllocationRequest, node: impl Into<String>, device: u32) -> Self {
        Self {
            id: AllocationId::new(),
            pod: request.pod.clone(),
            node: node.into(),
            device,
            memory_bytes: request.memory_bytes,
            compute_share: request.compute_share,
            created_at: Utc::now(),
        }
    }
}
