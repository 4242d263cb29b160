use crate::{GpushareError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Extended resource carrying the GPU memory a container asks for
pub const GPU_MEMORY_RESOURCE: &str = "gpushare.io/gpu-memory";

/// Extended resource carrying the compute share (0-100) a container asks for
pub const GPU_CORE_RESOURCE: &str = "gpushare.io/gpu-core";

/// Compute-share capacity of a single physical device
pub const COMPUTE_SHARE_CAPACITY: u32 = 100;

/// GPU share quantities for devices and pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuQuantities {
    /// GPU memory in bytes
    pub memory_bytes: u64,
    /// Compute share units (0-100 per device)
    pub compute_share: u32,
}

impl GpuQuantities {
    /// Parse memory string (e.g., "128Mi", "8Gi", "16G", "1024")
    pub fn parse_memory(s: &str) -> Result<u64> {
        let s = s.trim();
        let (num, multiplier): (&str, u64) = if let Some(num) = s.strip_suffix("Ki") {
            (num, 1 << 10)
        } else if let Some(num) = s.strip_suffix("Mi") {
            (num, 1 << 20)
        } else if let Some(num) = s.strip_suffix("Gi") {
            (num, 1 << 30)
        } else if let Some(num) = s.strip_suffix("Ti") {
            (num, 1 << 40)
        } else if let Some(num) = s.strip_suffix('k') {
            (num, 1_000)
        } else if let Some(num) = s.strip_suffix('M') {
            (num, 1_000_000)
        } else if let Some(num) = s.strip_suffix('G') {
            (num, 1_000_000_000)
        } else if let Some(num) = s.strip_suffix('T') {
            (num, 1_000_000_000_000)
        } else {
            // Plain bytes
            (s, 1)
        };

        let value = num
            .parse::<u64>()
            .map_err(|e| GpushareError::invalid_quantity(s, e.to_string()))?;

        value
            .checked_mul(multiplier)
            .ok_or_else(|| GpushareError::invalid_quantity(s, "value overflows 64 bits"))
    }

    /// Parse a compute share (integer in 0..=100)
    pub fn parse_compute(s: &str) -> Result<u32> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|e| GpushareError::invalid_quantity(s, e.to_string()))?;

        if value > COMPUTE_SHARE_CAPACITY {
            return Err(GpushareError::invalid_quantity(
                s,
                format!("compute share must be at most {}", COMPUTE_SHARE_CAPACITY),
            ));
        }

        Ok(value)
    }

    /// Read GPU memory and compute share from a container resource map
    ///
    /// Missing entries count as zero; malformed entries are an error.
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Result<Self> {
        Self::from_limits_and_requests(Some(resources), None)
    }

    /// Read GPU memory and compute share, each key from limits or else requests
    pub fn from_limits_and_requests(
        limits: Option<&BTreeMap<String, Quantity>>,
        requests: Option<&BTreeMap<String, Quantity>>,
    ) -> Result<Self> {
        let lookup = |key: &str| {
            limits
                .and_then(|m| m.get(key))
                .or_else(|| requests.and_then(|m| m.get(key)))
        };

        let memory_bytes = match lookup(GPU_MEMORY_RESOURCE) {
            Some(q) => Self::parse_memory(&q.0)?,
            None => 0,
        };

        let compute_share = match lookup(GPU_CORE_RESOURCE) {
            Some(q) => Self::parse_compute(&q.0)?,
            None => 0,
        };

        Ok(Self {
            memory_bytes,
            compute_share,
        })
    }

    /// Whether neither memory nor compute is requested
    pub fn is_zero(&self) -> bool {
        self.memory_bytes == 0 && self.compute_share == 0
    }

    /// Format bytes with the largest clean binary suffix (Gi, Mi, Ki)
    pub fn memory_as_quantity(bytes: u64) -> String {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;
        const KIB: u64 = 1024;

        if bytes > 0 && bytes % GIB == 0 {
            format!("{}Gi", bytes / GIB)
        } else if bytes > 0 && bytes % MIB == 0 {
            format!("{}Mi", bytes / MIB)
        } else if bytes > 0 && bytes % KIB == 0 {
            format!("{}Ki", bytes / KIB)
        } else {
            format!("{}", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        assert_eq!(GpuQuantities::parse_memory("1024").unwrap(), 1024);
        assert_eq!(GpuQuantities::parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(
            GpuQuantities::parse_memory("128Mi").unwrap(),
            128 * 1024 * 1024
        );
        assert_eq!(
            GpuQuantities::parse_memory("8Gi").unwrap(),
            8 * 1024 * 1024 * 1024
        );
        assert_eq!(GpuQuantities::parse_memory("16G").unwrap(), 16_000_000_000);
        assert!(GpuQuantities::parse_memory("lots").is_err());
        assert!(GpuQuantities::parse_memory("-1Gi").is_err());
        assert!(GpuQuantities::parse_memory("99999999999Ti").is_err());
    }

    #[test]
    fn test_parse_compute() {
        assert_eq!(GpuQuantities::parse_compute("0").unwrap(), 0);
        assert_eq!(GpuQuantities::parse_compute("35").unwrap(), 35);
        assert_eq!(GpuQuantities::parse_compute("100").unwrap(), 100);
        assert!(GpuQuantities::parse_compute("101").is_err());
        assert!(GpuQuantities::parse_compute("half").is_err());
    }

    #[test]
    fn test_from_k8s_resource_map() {
        let mut resources = BTreeMap::new();
        resources.insert(
            GPU_MEMORY_RESOURCE.to_string(),
            Quantity("2Gi".to_string()),
        );
        resources.insert(GPU_CORE_RESOURCE.to_string(), Quantity("25".to_string()));
        resources.insert("cpu".to_string(), Quantity("4".to_string()));

        let q = GpuQuantities::from_k8s_resource_map(&resources).unwrap();
        assert_eq!(q.memory_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(q.compute_share, 25);

        let empty = GpuQuantities::from_k8s_resource_map(&BTreeMap::new()).unwrap();
        assert!(empty.is_zero());
    }

    #[test]
    fn test_memory_as_quantity() {
        assert_eq!(GpuQuantities::memory_as_quantity(8 * 1024 * 1024 * 1024), "8Gi");
        assert_eq!(GpuQuantities::memory_as_quantity(1536 * 1024 * 1024), "1536Mi");
        assert_eq!(GpuQuantities::memory_as_quantity(256 * 1024), "256Ki");
        assert_eq!(GpuQuantities::memory_as_quantity(1023), "1023");
    }
}
