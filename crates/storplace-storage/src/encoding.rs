use crate::{Result, StorageError};
use std::fmt;
use storplace_core::{NodeName, ResourceName, StorPoolName};

/// Key encoder for registry prefixes
pub struct KeyEncoder;

impl KeyEncoder {
    pub const NODE_PREFIX: &'static str = "node/";
    pub const STOR_POOL_PREFIX: &'static str = "storpool/";
    pub const RESOURCE_PREFIX: &'static str = "resource/";
    pub const RESOURCE_DEFINITION_PREFIX: &'static str = "rscdfn/";

    /// All prefixes making up a registry, in load order
    pub fn registry_prefixes() -> [&'static str; 4] {
        [
            Self::NODE_PREFIX,
            Self::STOR_POOL_PREFIX,
            Self::RESOURCE_PREFIX,
            Self::RESOURCE_DEFINITION_PREFIX,
        ]
    }

    /// Prefix for the storage pools of one node: storpool/{node}/
    pub fn encode_stor_pool_prefix(node: &NodeName) -> String {
        format!("{}{}/", Self::STOR_POOL_PREFIX, node.value())
    }

    /// Prefix for the replicas of one resource: resource/{resource}/
    pub fn encode_resource_prefix(name: &ResourceName) -> String {
        format!("{}{}/", Self::RESOURCE_PREFIX, name.value())
    }
}

/// Key of one registry object
///
/// Names are encoded by their upper-cased identity so that keys are unique
/// regardless of the spelling used on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryKey {
    /// node/{node}
    Node(NodeName),
    /// storpool/{node}/{pool}
    StorPool { node: NodeName, name: StorPoolName },
    /// resource/{resource}/{node}
    Resource { name: ResourceName, node: NodeName },
    /// rscdfn/{resource}
    ResourceDefinition(ResourceName),
}

impl RegistryKey {
    /// Encode the key to a string
    pub fn encode(&self) -> String {
        match self {
            RegistryKey::Node(node) => format!("{}{}", KeyEncoder::NODE_PREFIX, node.value()),
            RegistryKey::StorPool { node, name } => {
                format!("{}{}", KeyEncoder::encode_stor_pool_prefix(node), name.value())
            }
            RegistryKey::Resource { name, node } => {
                format!("{}{}", KeyEncoder::encode_resource_prefix(name), node.value())
            }
            RegistryKey::ResourceDefinition(name) => {
                format!("{}{}", KeyEncoder::RESOURCE_DEFINITION_PREFIX, name.value())
            }
        }
    }

    /// Parse a stored key back to its components
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || StorageError::invalid_key(key);
        let parts: Vec<&str> = key.split('/').collect();

        let parsed = match parts.as_slice() {
            ["node", node] => RegistryKey::Node(NodeName::new(*node).map_err(|_| invalid())?),
            ["storpool", node, name] => RegistryKey::StorPool {
                node: NodeName::new(*node).map_err(|_| invalid())?,
                name: StorPoolName::new(*name).map_err(|_| invalid())?,
            },
            ["resource", name, node] => RegistryKey::Resource {
                name: ResourceName::new(*name).map_err(|_| invalid())?,
                node: NodeName::new(*node).map_err(|_| invalid())?,
            },
            ["rscdfn", name] => {
                RegistryKey::ResourceDefinition(ResourceName::new(*name).map_err(|_| invalid())?)
            }
            _ => return Err(invalid()),
        };

        Ok(parsed)
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_registry_keys() {
        let node = NodeName::new("alpha").unwrap();
        let pool = StorPoolName::new("Fast").unwrap();
        let rsc = ResourceName::new("db").unwrap();

        assert_eq!(RegistryKey::Node(node.clone()).encode(), "node/ALPHA");
        assert_eq!(
            RegistryKey::StorPool {
                node: node.clone(),
                name: pool
            }
            .encode(),
            "storpool/ALPHA/FAST"
        );
        assert_eq!(
            RegistryKey::Resource {
                name: rsc.clone(),
                node: node.clone()
            }
            .encode(),
            "resource/DB/ALPHA"
        );
        assert_eq!(RegistryKey::ResourceDefinition(rsc).encode(), "rscdfn/DB");
    }

    #[test]
    fn test_encode_prefixes() {
        let node = NodeName::new("alpha").unwrap();
        assert_eq!(KeyEncoder::encode_stor_pool_prefix(&node), "storpool/ALPHA/");
        let rsc = ResourceName::new("db").unwrap();
        assert_eq!(KeyEncoder::encode_resource_prefix(&rsc), "resource/DB/");
    }

    #[test]
    fn test_parse_key() {
        let key = RegistryKey::parse("storpool/ALPHA/FAST").unwrap();
        assert_eq!(
            key,
            RegistryKey::StorPool {
                node: NodeName::new("alpha").unwrap(),
                name: StorPoolName::new("fast").unwrap(),
            }
        );

        assert!(matches!(
            RegistryKey::parse("node/ALPHA/extra"),
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(RegistryKey::parse("bogus/1").is_err());
    }
}
