//! Storplace Core - Cluster model for the storage placement control plane
//!
//! This crate provides:
//! - Validated, case-insensitive object names
//! - Nodes, storage pools, provider kinds and deployed resources
//! - The immutable `ClusterSnapshot` the scheduler works on
//! - Access-control interfaces
//! - Error types with miette diagnostics

pub mod error;
pub mod names;
pub mod quantities;
pub mod security;
pub mod snapshot;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use names::{is_valid_name, NodeName, ResourceName, StorPoolName};
pub use quantities::parse_size_kib;
pub use security::{
    AccessContext, AccessDenied, AccessPolicy, AccessType, AclConfig, AclGrant, AllowAll,
    SecuredObject, StaticAcl,
};
pub use snapshot::{ClusterSnapshot, SnapshotData};
pub use types::{Node, ProviderKind, Resource, StorPool, Volume};

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SnapshotData {
        ClusterSnapshot::builder()
            .node(Node::new(NodeName::new("alpha").unwrap()).with_prop("zone", "a"))
            .storage_pool(StorPool::new(
                StorPoolName::new("fast").unwrap(),
                NodeName::new("alpha").unwrap(),
                ProviderKind::Zfs,
            ))
    }

    #[test]
    fn test_json_serialization() {
        let json = to_json(&sample()).unwrap();
        assert!(json.contains("alpha"));

        let snapshot: ClusterSnapshot = from_json(&json).unwrap();
        assert!(snapshot.node(&NodeName::new("alpha").unwrap()).is_some());
    }

    #[test]
    fn test_yaml_serialization() {
        let yaml = to_yaml(&sample()).unwrap();
        assert!(yaml.contains("ZFS"));

        let data: SnapshotData = from_yaml(&yaml).unwrap();
        assert_eq!(data, sample());
    }

    #[test]
    fn test_invalid_snapshot_is_rejected_on_deserialize() {
        let json = r#"{"storage_pools": [{"name": "fast", "node": "ghost", "provider_kind": "LVM"}]}"#;
        let result: Result<ClusterSnapshot> = from_json(json);
        assert!(matches!(result, Err(CoreError::SerializationError { .. })));
    }
}
