use crate::{KVStore, ReadView, Result, StorageError, Transaction as KVTransaction};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

// Registry table: encoded object key -> JSON object
const REGISTRY_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("registry");

/// redb-based storage backend
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening redb database at: {}", path.as_ref().display());

        let db = Database::create(path.as_ref()).map_err(|e| {
            StorageError::database_error(
                format!("Failed to create database: {}", e),
                Some(Box::new(e)),
            )
        })?;

        // Create the table if it doesn't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REGISTRY_TABLE)?;
        }
        write_txn.commit()?;

        info!("redb database initialized successfully");

        Ok(Self { db: Arc::new(db) })
    }
}

/// Collect all entries of a table whose key starts with `prefix`
fn scan_table<T>(table: &T, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut results = Vec::new();

    // Keys are ordered, so the prefix range starts at the prefix itself
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        let key_bytes = key.value();
        if !key_bytes.starts_with(prefix) {
            break;
        }
        results.push((
            Bytes::copy_from_slice(key_bytes),
            Bytes::copy_from_slice(value.value()),
        ));
    }

    Ok(results)
}

impl KVStore for RedbBackend {
    fn transaction(&self) -> Result<Box<dyn KVTransaction>> {
        let write_txn = self.db.begin_write()?;
        Ok(Box::new(RedbTransaction {
            txn: Some(write_txn),
            committed: false,
        }))
    }

    fn read_view(&self) -> Result<Box<dyn ReadView>> {
        let read_txn = self.db.begin_read()?;
        Ok(Box::new(RedbReadView { txn: read_txn }))
    }
}

/// redb read transaction pinned for the lifetime of the view
struct RedbReadView {
    txn: redb::ReadTransaction,
}

impl ReadView for RedbReadView {
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        debug!(
            "Scanning with prefix: {:?}",
            String::from_utf8_lossy(prefix)
        );

        let table = self.txn.open_table(REGISTRY_TABLE)?;
        let results = scan_table(&table, prefix)?;

        debug!("Scan found {} results", results.len());
        Ok(results)
    }
}

/// redb transaction implementation
struct RedbTransaction {
    txn: Option<redb::WriteTransaction>,
    committed: bool,
}

impl RedbTransaction {
    fn txn(&self) -> Result<&redb::WriteTransaction> {
        self.txn.as_ref().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed")
        })
    }
}

impl KVTransaction for RedbTransaction {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn()?.open_table(REGISTRY_TABLE)?;
        table.insert(key, value)?;

        Ok(())
    }

    fn delete_prefix(&mut self, prefix: &[u8]) -> Result<usize> {
        let mut table = self.txn()?.open_table(REGISTRY_TABLE)?;

        let keys: Vec<Bytes> = scan_table(&table, prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            table.remove(key.as_ref())?;
        }

        Ok(keys.len())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed")
        })?;

        txn.commit()?;
        self.committed = true;

        Ok(())
    }
}

impl Drop for RedbTransaction {
    fn drop(&mut self) {
        if !self.committed {
            // Auto-rollback if not committed
            if let Some(txn) = self.txn.take() {
                let _ = txn.abort();
            }
        }
    }
}
