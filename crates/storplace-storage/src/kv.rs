use crate::Result;
use bytes::Bytes;

/// Key-value store trait
///
/// All writes go through a transaction and all reads through a view, so
/// every registry access sees one consistent state.
pub trait KVStore: Send + Sync {
    /// Begin a write transaction
    fn transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Open a read-only view pinned to the current point in time
    fn read_view(&self) -> Result<Box<dyn ReadView>>;
}

/// Transaction trait for atomic operations
///
/// Dropping a transaction without committing discards its writes.
pub trait Transaction: Send {
    /// Put a key-value pair
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete every key with the given prefix, returning how many were removed
    fn delete_prefix(&mut self, prefix: &[u8]) -> Result<usize>;

    /// Commit the transaction
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Read-only view; every read observes the same committed state
pub trait ReadView {
    /// Scan keys with a given prefix, in key order
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;
}
