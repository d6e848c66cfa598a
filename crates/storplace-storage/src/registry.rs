use crate::{KVStore, KeyEncoder, RedbBackend, RegistryKey, Result, StorageError};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use storplace_core::{ClusterSnapshot, Node, Resource, ResourceName, SnapshotData, StorPool};
use tracing::{debug, info};

/// Persistent node/storage-pool/resource registry
///
/// The registry is always written and read as a whole, so callers only ever
/// observe complete snapshots.
pub struct RegistryStore {
    store: Arc<dyn KVStore>,
}

impl RegistryStore {
    /// Wrap an existing key-value store
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self { store }
    }

    /// Open (or create) a redb-backed registry at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let backend = RedbBackend::new(path)?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Replace the stored registry with `snapshot` in one transaction
    pub fn save_snapshot(&self, snapshot: &ClusterSnapshot) -> Result<()> {
        let data = snapshot.to_data();
        let mut txn = self.store.transaction()?;

        let mut removed = 0;
        for prefix in KeyEncoder::registry_prefixes() {
            removed += txn.delete_prefix(prefix.as_bytes())?;
        }
        debug!("Cleared {} previous registry entries", removed);

        for node in &data.nodes {
            let key = RegistryKey::Node(node.name.clone());
            txn.put(key.encode().as_bytes(), &serde_json::to_vec(node)?)?;
        }
        for pool in &data.storage_pools {
            let key = RegistryKey::StorPool {
                node: pool.node.clone(),
                name: pool.name.clone(),
            };
            txn.put(key.encode().as_bytes(), &serde_json::to_vec(pool)?)?;
        }
        for rsc in &data.resources {
            let key = RegistryKey::Resource {
                name: rsc.name.clone(),
                node: rsc.node.clone(),
            };
            txn.put(key.encode().as_bytes(), &serde_json::to_vec(rsc)?)?;
        }
        for name in &data.resource_definitions {
            let key = RegistryKey::ResourceDefinition(name.clone());
            txn.put(key.encode().as_bytes(), &serde_json::to_vec(name)?)?;
        }

        txn.commit()?;

        info!(
            "Saved registry: {} nodes, {} storage pools, {} resources, {} resource definitions",
            data.nodes.len(),
            data.storage_pools.len(),
            data.resources.len(),
            data.resource_definitions.len()
        );
        Ok(())
    }

    /// Load the registry as one consistent snapshot
    pub fn load_snapshot(&self) -> Result<ClusterSnapshot> {
        let view = self.store.read_view()?;
        let mut data = SnapshotData::default();

        for (key, value) in view.scan(KeyEncoder::NODE_PREFIX.as_bytes())? {
            let node: Node = decode(&key, &value)?;
            expect_key(&key, RegistryKey::Node(node.name.clone()))?;
            data.nodes.push(node);
        }

        for (key, value) in view.scan(KeyEncoder::STOR_POOL_PREFIX.as_bytes())? {
            let pool: StorPool = decode(&key, &value)?;
            expect_key(
                &key,
                RegistryKey::StorPool {
                    node: pool.node.clone(),
                    name: pool.name.clone(),
                },
            )?;
            data.storage_pools.push(pool);
        }

        for (key, value) in view.scan(KeyEncoder::RESOURCE_PREFIX.as_bytes())? {
            let rsc: Resource = decode(&key, &value)?;
            expect_key(
                &key,
                RegistryKey::Resource {
                    name: rsc.name.clone(),
                    node: rsc.node.clone(),
                },
            )?;
            data.resources.push(rsc);
        }

        for (key, value) in view.scan(KeyEncoder::RESOURCE_DEFINITION_PREFIX.as_bytes())? {
            let name: ResourceName = decode(&key, &value)?;
            expect_key(&key, RegistryKey::ResourceDefinition(name.clone()))?;
            data.resource_definitions.push(name);
        }

        debug!(
            "Loaded registry entries: {} nodes, {} storage pools, {} resources",
            data.nodes.len(),
            data.storage_pools.len(),
            data.resources.len()
        );

        Ok(ClusterSnapshot::new(data)?)
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).map_err(|e| {
        StorageError::serialization_error(
            format!(
                "Failed to deserialize registry entry '{}': {}",
                String::from_utf8_lossy(key),
                e
            ),
            Some(Box::new(e)),
        )
    })
}

/// Stored key must match the object it holds
fn expect_key(key: &[u8], expected: RegistryKey) -> Result<()> {
    let key = String::from_utf8_lossy(key);
    if RegistryKey::parse(&key)? != expected {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storplace_core::{NodeName, ProviderKind, StorPoolName};
    use tempfile::tempdir;

    fn sample_snapshot() -> ClusterSnapshot {
        let alpha = NodeName::new("alpha").unwrap();
        let bravo = NodeName::new("bravo").unwrap();
        let fast = StorPoolName::new("fast").unwrap();

        ClusterSnapshot::builder()
            .node(Node::new(alpha.clone()).with_prop("Aux/zone", "a"))
            .node(Node::new(bravo.clone()))
            .storage_pool(
                StorPool::new(fast.clone(), alpha.clone(), ProviderKind::Lvm).with_free_space(1024),
            )
            .storage_pool(StorPool::new(fast.clone(), bravo.clone(), ProviderKind::Lvm))
            .resource(
                Resource::new(ResourceName::new("db").unwrap(), alpha).with_volume(fast, 512),
            )
            .resource(Resource::new(ResourceName::new("db").unwrap(), bravo).diskless())
            .resource_definition(ResourceName::new("empty").unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = tempdir().unwrap();
        let registry = RegistryStore::open(dir.path().join("registry.redb")).unwrap();

        let snapshot = sample_snapshot();
        registry.save_snapshot(&snapshot).unwrap();

        let loaded = registry.load_snapshot().unwrap();
        assert_eq!(loaded.to_data(), snapshot.to_data());
        assert!(loaded.has_resource(&ResourceName::new("EMPTY").unwrap()));
    }

    #[test]
    fn test_save_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let registry = RegistryStore::open(dir.path().join("registry.redb")).unwrap();

        registry.save_snapshot(&sample_snapshot()).unwrap();

        let smaller = ClusterSnapshot::builder()
            .node(Node::new(NodeName::new("charlie").unwrap()))
            .build()
            .unwrap();
        registry.save_snapshot(&smaller).unwrap();

        let loaded = registry.load_snapshot().unwrap();
        let names: Vec<_> = loaded.nodes().map(|n| n.name.to_string()).collect();
        assert_eq!(names, vec!["charlie"]);
        assert_eq!(loaded.resource_names().count(), 0);
    }

    #[test]
    fn test_load_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = RegistryStore::open(dir.path().join("registry.redb")).unwrap();

        let loaded = registry.load_snapshot().unwrap();
        assert_eq!(loaded.nodes().count(), 0);
    }

    /// Write an entry behind the registry's back
    fn put_raw(backend: &RedbBackend, key: &[u8], value: &[u8]) {
        let mut txn = backend.transaction().unwrap();
        txn.put(key, value).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_load_rejects_mismatched_key() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbBackend::new(dir.path().join("registry.redb")).unwrap());
        let node = Node::new(NodeName::new("alpha").unwrap());
        put_raw(&backend, b"node/BRAVO", &serde_json::to_vec(&node).unwrap());

        let registry = RegistryStore::new(backend);
        assert!(matches!(
            registry.load_snapshot(),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_load_rejects_dangling_reference() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbBackend::new(dir.path().join("registry.redb")).unwrap());
        let pool = StorPool::new(
            StorPoolName::new("fast").unwrap(),
            NodeName::new("ghost").unwrap(),
            ProviderKind::Zfs,
        );
        put_raw(&backend, b"storpool/GHOST/FAST", &serde_json::to_vec(&pool).unwrap());

        let registry = RegistryStore::new(backend);
        assert!(matches!(
            registry.load_snapshot(),
            Err(StorageError::InvalidRegistry(_))
        ));
    }
}
