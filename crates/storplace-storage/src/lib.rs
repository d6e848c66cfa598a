//! Storplace Storage - Registry persistence on top of redb
//!
//! This crate provides:
//! - KVStore trait for storage abstraction
//! - redb-based implementation
//! - Registry key encoding
//! - Atomic snapshot save and point-in-time snapshot load

pub mod encoding;
pub mod error;
pub mod kv;
pub mod redb_backend;
pub mod registry;

// Re-export commonly used types
pub use encoding::{KeyEncoder, RegistryKey};
pub use error::{Result, StorageError};
pub use kv::{KVStore, ReadView, Transaction};
pub use redb_backend::RedbBackend;
pub use registry::RegistryStore;
