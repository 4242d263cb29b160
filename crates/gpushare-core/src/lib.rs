//! gpushare Core - Fundamental types for the GPU-sharing scheduler extender
//!
//! This crate provides:
//! - GPU device, request and allocation types
//! - Error types with miette diagnostics
//! - GPU quantity parsing
//! - Pod to GPU share request extraction
//! - Inventory seed file format

pub mod config;
pub mod error;
pub mod quantities;
pub mod request;
pub mod types;

// Re-export commonly used types
pub use config::{devices_from_specs, DeviceSpec, InventoryFile, NodeSpec};
pub use error::{GpushareError, Result};
pub use quantities::{GpuQuantities, COMPUTE_SHARE_CAPACITY};
pub use request::{is_gpu_share_pod, request_from_pod, DEVICE_INDEX_ANNOTATION};
pub use types::{Allocation, AllocationId, AllocationRequest, GpuDevice, PodKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
