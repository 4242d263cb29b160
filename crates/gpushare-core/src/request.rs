use crate::quantities::{GpuQuantities, GPU_CORE_RESOURCE, GPU_MEMORY_RESOURCE};
use crate::{AllocationRequest, GpushareError, PodKey, Result};
use k8s_openapi::api::core::v1::Pod;

/// Annotation naming the device a pod prefers
pub const DEVICE_INDEX_ANNOTATION: &str = "gpushare.io/device-index";

/// Whether any container of the pod names a GPU share resource
pub fn is_gpu_share_pod(pod: &Pod) -> bool {
    let containers = match &pod.spec {
        Some(spec) => &spec.containers,
        None => return false,
    };

    containers
        .iter()
        .filter_map(|c| c.resources.as_ref())
        .flat_map(|r| r.limits.iter().chain(r.requests.iter()))
        .any(|map| map.contains_key(GPU_MEMORY_RESOURCE) || map.contains_key(GPU_CORE_RESOURCE))
}

/// Derive the GPU share request of a pod
///
/// Sums `gpushare.io/gpu-memory` and `gpushare.io/gpu-core` across containers.
/// Each resource is read from limits first, falling back to requests.
pub fn request_from_pod(pod: &Pod) -> Result<AllocationRequest> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let key = PodKey::new(namespace, name);

    let spec = pod.spec.as_ref().ok_or_else(|| {
        GpushareError::invalid_request(key.to_string(), "pod has no spec", "Send the full pod object")
    })?;

    let mut total = GpuQuantities::default();

    for container in &spec.containers {
        let resources = match &container.resources {
            Some(r) => r,
            None => continue,
        };

        let q = GpuQuantities::from_limits_and_requests(
            resources.limits.as_ref(),
            resources.requests.as_ref(),
        )
        .map_err(|e| {
            GpushareError::invalid_request(
                key.to_string(),
                format!("container {}: {}", container.name, e),
                "Use a quantity like 2Gi for memory and an integer 0-100 for compute",
            )
        })?;

        total.memory_bytes = total.memory_bytes.checked_add(q.memory_bytes).ok_or_else(|| {
            GpushareError::invalid_request(
                key.to_string(),
                "total GPU memory overflows",
                "Reduce the GPU memory requested by the containers",
            )
        })?;
        total.compute_share = total.compute_share.saturating_add(q.compute_share);
    }

    let device_hint = match pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DEVICE_INDEX_ANNOTATION))
    {
        Some(value) => Some(value.trim().parse::<u32>().map_err(|e| {
            GpushareError::invalid_request(
                key.to_string(),
                format!("invalid {} annotation '{}': {}", DEVICE_INDEX_ANNOTATION, value, e),
                "Set the annotation to a device index such as \"0\"",
            )
        })?),
        None => None,
    };

    let request = AllocationRequest {
        pod: key,
        memory_bytes: total.memory_bytes,
        compute_share: total.compute_share,
        device_hint,
    };

    request.validate()?;

    Ok(request)
}
