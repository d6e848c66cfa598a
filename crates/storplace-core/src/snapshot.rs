use crate::names::{NodeName, ResourceName, StorPoolName};
use crate::types::{Node, Resource, StorPool};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Serialized form of a cluster snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub storage_pools: Vec<StorPool>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Registered resource definitions, including those without replicas
    #[serde(default)]
    pub resource_definitions: Vec<ResourceName>,
}

impl SnapshotData {
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn storage_pool(mut self, pool: StorPool) -> Self {
        self.storage_pools.push(pool);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resource_definition(mut self, name: ResourceName) -> Self {
        self.resource_definitions.push(name);
        self
    }

    /// Validate and index the data
    pub fn build(self) -> Result<ClusterSnapshot> {
        ClusterSnapshot::new(self)
    }
}

/// Immutable, internally consistent view of the node/storage-pool registry
///
/// All lookups are served from indices built once on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SnapshotData", into = "SnapshotData")]
pub struct ClusterSnapshot {
    nodes: BTreeMap<NodeName, Node>,
    pool_definitions: BTreeMap<StorPoolName, BTreeMap<NodeName, StorPool>>,
    replicas: BTreeMap<ResourceName, BTreeMap<NodeName, Resource>>,
    resource_definitions: BTreeSet<ResourceName>,
    node_resources: BTreeMap<NodeName, BTreeSet<ResourceName>>,
    pool_resources: BTreeMap<(NodeName, StorPoolName), BTreeSet<ResourceName>>,
}

impl ClusterSnapshot {
    /// Start an empty snapshot description
    pub fn builder() -> SnapshotData {
        SnapshotData::default()
    }

    /// Validate references and build lookup indices
    pub fn new(data: SnapshotData) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for node in data.nodes {
            if nodes.contains_key(&node.name) {
                return Err(CoreError::invalid_snapshot(
                    format!("node '{}' is listed twice", node.name),
                    "Node names are case-insensitive and must be unique",
                ));
            }
            nodes.insert(node.name.clone(), node);
        }

        let mut pool_definitions: BTreeMap<StorPoolName, BTreeMap<NodeName, StorPool>> =
            BTreeMap::new();
        for pool in data.storage_pools {
            if !nodes.contains_key(&pool.node) {
                return Err(CoreError::node_not_found(pool.node.as_str()));
            }
            let on_nodes = pool_definitions.entry(pool.name.clone()).or_default();
            if on_nodes.contains_key(&pool.node) {
                return Err(CoreError::invalid_snapshot(
                    format!("{} is listed twice", pool),
                    "A node can host only one storage pool per name",
                ));
            }
            on_nodes.insert(pool.node.clone(), pool);
        }

        let mut replicas: BTreeMap<ResourceName, BTreeMap<NodeName, Resource>> = BTreeMap::new();
        let mut node_resources: BTreeMap<NodeName, BTreeSet<ResourceName>> = BTreeMap::new();
        let mut pool_resources: BTreeMap<(NodeName, StorPoolName), BTreeSet<ResourceName>> =
            BTreeMap::new();
        let mut resource_definitions: BTreeSet<ResourceName> =
            data.resource_definitions.into_iter().collect();

        for rsc in data.resources {
            if !nodes.contains_key(&rsc.node) {
                return Err(CoreError::node_not_found(rsc.node.as_str()));
            }
            for vlm in &rsc.volumes {
                let pool_exists = pool_definitions
                    .get(&vlm.storage_pool)
                    .is_some_and(|on_nodes| on_nodes.contains_key(&rsc.node));
                if !pool_exists {
                    return Err(CoreError::stor_pool_not_found(
                        rsc.node.as_str(),
                        vlm.storage_pool.as_str(),
                    ));
                }
                pool_resources
                    .entry((rsc.node.clone(), vlm.storage_pool.clone()))
                    .or_default()
                    .insert(rsc.name.clone());
            }

            node_resources
                .entry(rsc.node.clone())
                .or_default()
                .insert(rsc.name.clone());
            resource_definitions.insert(rsc.name.clone());

            let on_nodes = replicas.entry(rsc.name.clone()).or_default();
            if on_nodes.contains_key(&rsc.node) {
                return Err(CoreError::invalid_snapshot(
                    format!("{} is listed twice", rsc),
                    "A node can host only one replica of a resource",
                ));
            }
            on_nodes.insert(rsc.node.clone(), rsc);
        }

        debug!(
            "Cluster snapshot indexed: {} nodes, {} storage pool definitions, {} resource definitions",
            nodes.len(),
            pool_definitions.len(),
            resource_definitions.len()
        );

        Ok(Self {
            nodes,
            pool_definitions,
            replicas,
            resource_definitions,
            node_resources,
            pool_resources,
        })
    }

    /// Load a snapshot from a JSON or YAML file (chosen by extension, YAML otherwise)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::io_error(
                format!("Failed to read snapshot '{}': {}", path.display(), e),
                Some(Box::new(e)),
            )
        })?;

        let data: SnapshotData = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => crate::from_json(&content)?,
            _ => crate::from_yaml(&content)?,
        };

        Self::new(data)
    }

    /// Convert back into the serialized form
    pub fn to_data(&self) -> SnapshotData {
        SnapshotData {
            nodes: self.nodes.values().cloned().collect(),
            storage_pools: self
                .pool_definitions
                .values()
                .flat_map(|on_nodes| on_nodes.values().cloned())
                .collect(),
            resources: self
                .replicas
                .values()
                .flat_map(|on_nodes| on_nodes.values().cloned())
                .collect(),
            resource_definitions: self.resource_definitions.iter().cloned().collect(),
        }
    }

    pub fn node(&self, name: &NodeName) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Names of all storage pool definitions
    pub fn storage_pool_names(&self) -> impl Iterator<Item = &StorPoolName> {
        self.pool_definitions.keys()
    }

    /// All pools sharing a name, ordered by node name
    pub fn storage_pools(&self, name: &StorPoolName) -> impl Iterator<Item = &StorPool> {
        self.pool_definitions
            .get(name)
            .into_iter()
            .flat_map(|on_nodes| on_nodes.values())
    }

    pub fn storage_pool(&self, node: &NodeName, name: &StorPoolName) -> Option<&StorPool> {
        self.pool_definitions
            .get(name)
            .and_then(|on_nodes| on_nodes.get(node))
    }

    /// Resources with a replica (diskful or diskless) on the node
    pub fn resources_on_node(&self, node: &NodeName) -> impl Iterator<Item = &ResourceName> {
        self.node_resources.get(node).into_iter().flatten()
    }

    /// Resources with at least one volume in the given storage pool
    pub fn resources_in_storage_pool(
        &self,
        node: &NodeName,
        name: &StorPoolName,
    ) -> impl Iterator<Item = &ResourceName> {
        self.pool_resources
            .get(&(node.clone(), name.clone()))
            .into_iter()
            .flatten()
    }

    /// Deployed replicas of a resource, ordered by node name
    pub fn replicas(&self, name: &ResourceName) -> impl Iterator<Item = &Resource> {
        self.replicas
            .get(name)
            .into_iter()
            .flat_map(|on_nodes| on_nodes.values())
    }

    /// The resource-name registry
    pub fn resource_names(&self) -> impl Iterator<Item = &ResourceName> {
        self.resource_definitions.iter()
    }

    pub fn has_resource(&self, name: &ResourceName) -> bool {
        self.resource_definitions.contains(name)
    }
}

impl TryFrom<SnapshotData> for ClusterSnapshot {
    type Error = CoreError;

    fn try_from(data: SnapshotData) -> Result<Self> {
        Self::new(data)
    }
}

impl From<ClusterSnapshot> for SnapshotData {
    fn from(snapshot: ClusterSnapshot) -> Self {
        snapshot.to_data()
    }
}
