//! Offered resources and the scalar arithmetic over them.
//!
//! Agents advertise named resources; the three the scheduler plans with are
//! the scalars `cpus`, `mem`, and `disk`. Ranges and sets are carried
//! through untouched so offers round-trip faithfully.

use serde::{Deserialize, Serialize};

/// Comparison slack for floating-point resource math.
///
/// Offers arrive as f64 scalars that have been subtracted on the master
/// side; exact comparison would reject offers that are equal up to rounding.
pub const EPSILON: f64 = 1e-9;

/// Canonical scalar resource names.
pub const RESOURCE_CPUS: &str = "cpus";
pub const RESOURCE_MEM: &str = "mem";
pub const RESOURCE_DISK: &str = "disk";

/// A single named resource advertised in an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource name (`cpus`, `mem`, `disk`, `ports`, ...).
    pub name: String,

    /// Resource value.
    pub value: ResourceValue,

    /// Allocation role, when the master scopes the resource to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Resource {
    /// Builds a scalar resource.
    #[must_use]
    pub fn scalar(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value: ResourceValue::Scalar(value),
            role: None,
        }
    }

    /// Returns the scalar value, if this resource is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self.value {
            ResourceValue::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// Resource value variants, as the master types them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceValue {
    /// A floating-point quantity.
    Scalar(f64),
    /// Disjoint inclusive ranges (ports).
    Ranges(Vec<(u64, u64)>),
    /// A set of strings.
    Set(Vec<String>),
}

/// The scalar triple the scheduler plans with.
///
/// Used for both a task's request and an offer's remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceQuota {
    /// CPU share in cores.
    pub cpu: f64,
    /// Memory in megabytes.
    pub mem: f64,
    /// Disk in megabytes.
    pub disk: f64,
}

impl ResourceQuota {
    /// Builds a quota from explicit scalars.
    #[must_use]
    pub fn new(cpu: f64, mem: f64, disk: f64) -> Self {
        Self { cpu, mem, disk }
    }

    /// Sums the scalar `cpus`/`mem`/`disk` resources of an offer.
    #[must_use]
    pub fn from_resources(resources: &[Resource]) -> Self {
        let mut quota = Self::default();
        for resource in resources {
            let Some(value) = resource.as_scalar() else {
                continue;
            };
            match resource.name.as_str() {
                RESOURCE_CPUS => quota.cpu += value,
                RESOURCE_MEM => quota.mem += value,
                RESOURCE_DISK => quota.disk += value,
                _ => {}
            }
        }
        quota
    }

    /// True when this quota can satisfy `request` within [`EPSILON`].
    #[must_use]
    pub fn covers(&self, request: &ResourceQuota) -> bool {
        self.cpu + EPSILON >= request.cpu
            && self.mem + EPSILON >= request.mem
            && self.disk + EPSILON >= request.disk
    }

    /// Subtracts `request`, clamping at zero to absorb epsilon residue.
    pub fn subtract(&mut self, request: &ResourceQuota) {
        self.cpu = (self.cpu - request.cpu).max(0.0);
        self.mem = (self.mem - request.mem).max(0.0);
        self.disk = (self.disk - request.disk).max(0.0);
    }

    /// Renders the quota back into named scalar resources.
    #[must_use]
    pub fn to_resources(&self) -> Vec<Resource> {
        vec![
            Resource::scalar(RESOURCE_CPUS, self.cpu),
            Resource::scalar(RESOURCE_MEM, self.mem),
            Resource::scalar(RESOURCE_DISK, self.disk),
        ]
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_from_resources_sums_scalars() {
        let resources = vec![
            Resource::scalar(RESOURCE_CPUS, 1.5),
            Resource::scalar(RESOURCE_CPUS, 0.5),
            Resource::scalar(RESOURCE_MEM, 1024.0),
            Resource {
                name: "ports".to_string(),
                value: ResourceValue::Ranges(vec![(31000, 32000)]),
                role: None,
            },
        ];

        let quota = ResourceQuota::from_resources(&resources);
        assert_eq!(quota.cpu, 2.0);
        assert_eq!(quota.mem, 1024.0);
        assert_eq!(quota.disk, 0.0);
    }

    #[test]
    fn test_covers_with_epsilon() {
        // 0.3 is not exactly representable; 0.1 + 0.2 must still cover it.
        let offered = ResourceQuota::new(0.1 + 0.2, 128.0, 0.0);
        let request = ResourceQuota::new(0.3, 128.0, 0.0);
        assert!(offered.covers(&request));
    }

    #[test]
    fn test_covers_rejects_shortfall() {
        let offered = ResourceQuota::new(1.0, 128.0, 0.0);
        let request = ResourceQuota::new(1.0, 129.0, 0.0);
        assert!(!offered.covers(&request));
    }

    #[test]
    fn test_subtract_clamps_at_zero() {
        let mut offered = ResourceQuota::new(0.1 + 0.2, 256.0, 0.0);
        offered.subtract(&ResourceQuota::new(0.3, 256.0, 0.0));
        assert!(offered.cpu >= 0.0);
        assert_eq!(offered.mem, 0.0);
    }

    #[test]
    fn test_resource_json_roundtrip() {
        let resource = Resource::scalar(RESOURCE_MEM, 512.0);
        let json = serde_json::to_string(&resource).unwrap();
        let parsed: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(resource, parsed);
    }
}
