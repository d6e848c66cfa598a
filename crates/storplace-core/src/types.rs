use crate::names::{NodeName, ResourceName, StorPoolName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Storage backend type backing a storage pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Diskless,
    Lvm,
    LvmThin,
    Zfs,
    ZfsThin,
    File,
    FileThin,
    Spdk,
    Exos,
}

impl ProviderKind {
    /// Whether volumes of this kind are thin-provisioned
    pub fn uses_thin_provisioning(&self) -> bool {
        matches!(
            self,
            ProviderKind::LvmThin | ProviderKind::ZfsThin | ProviderKind::FileThin
        )
    }

    /// Whether this kind stores no data locally
    pub fn is_diskless(&self) -> bool {
        matches!(self, ProviderKind::Diskless)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Diskless => "DISKLESS",
            ProviderKind::Lvm => "LVM",
            ProviderKind::LvmThin => "LVM_THIN",
            ProviderKind::Zfs => "ZFS",
            ProviderKind::ZfsThin => "ZFS_THIN",
            ProviderKind::File => "FILE",
            ProviderKind::FileThin => "FILE_THIN",
            ProviderKind::Spdk => "SPDK",
            ProviderKind::Exos => "EXOS",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: NodeName,
    /// Node properties (e.g. "Aux/zone" -> "a")
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    /// Whether the controller currently has a connection to the node
    #[serde(default = "default_connected")]
    pub connected: bool,
}

fn default_connected() -> bool {
    true
}

impl Node {
    /// Create a connected node without properties
    pub fn new(name: NodeName) -> Self {
        Self {
            name,
            props: BTreeMap::new(),
            connected: true,
        }
    }

    /// Builder-style property setter
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Get a property value
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }
}

/// A storage pool on a specific node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorPool {
    /// Storage pool name
    pub name: StorPoolName,
    /// Node hosting the pool
    pub node: NodeName,
    /// Backend type
    pub provider_kind: ProviderKind,
    /// Current free space estimation in KiB, if known
    #[serde(default)]
    pub free_space_kib: Option<u64>,
    /// Total capacity in KiB, if known
    #[serde(default)]
    pub total_capacity_kib: Option<u64>,
}

impl StorPool {
    pub fn new(name: StorPoolName, node: NodeName, provider_kind: ProviderKind) -> Self {
        Self {
            name,
            node,
            provider_kind,
            free_space_kib: None,
            total_capacity_kib: None,
        }
    }

    /// Builder-style free space setter
    pub fn with_free_space(mut self, free_space_kib: u64) -> Self {
        self.free_space_kib = Some(free_space_kib);
        self
    }

    /// Builder-style capacity setter
    pub fn with_capacity(mut self, total_capacity_kib: u64) -> Self {
        self.total_capacity_kib = Some(total_capacity_kib);
        self
    }
}

impl fmt::Display for StorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage pool '{}' on node '{}'", self.name, self.node)
    }
}

/// A volume of a deployed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume number within the resource
    pub number: u32,
    /// Storage pool on the resource's node backing this volume
    pub storage_pool: StorPoolName,
    /// Volume size in KiB
    #[serde(default)]
    pub size_kib: u64,
}

/// One deployed replica of a resource on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource definition name
    pub name: ResourceName,
    /// Node hosting this replica
    pub node: NodeName,
    /// Replica has no local storage
    #[serde(default)]
    pub diskless: bool,
    /// Volumes of this replica
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Resource {
    pub fn new(name: ResourceName, node: NodeName) -> Self {
        Self {
            name,
            node,
            diskless: false,
            volumes: Vec::new(),
        }
    }

    /// Builder-style volume setter
    pub fn with_volume(mut self, storage_pool: StorPoolName, size_kib: u64) -> Self {
        let number = self.volumes.len() as u32;
        self.volumes.push(Volume {
            number,
            storage_pool,
            size_kib,
        });
        self
    }

    /// Mark the replica as diskless
    pub fn diskless(mut self) -> Self {
        self.diskless = true;
        self
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource '{}' on node '{}'", self.name, self.node)
    }
}
