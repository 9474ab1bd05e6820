//! Persistence layer: lease and row capabilities plus their backends.

/// CouchDB backend for rows and leases.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// Typed aggregate <-> row conversion.
pub mod entity;
/// Key sanitization and lock key derivation.
pub mod keys;
/// Exclusive time-bounded leases on named objects.
pub mod lease_store;
/// In-process backends.
pub mod memory;
/// Row and etag types shared by all backends.
pub mod models;
/// MongoDB backend for rows and leases.
#[cfg(feature = "mongo-store")]
pub mod mongodb;
/// Backend-agnostic storage errors.
pub mod storage;
/// Keyed row persistence.
pub mod table_store;

use std::sync::Arc;

use lease_store::LeaseStore;
use storage::StorageResult;
use table_store::TableStore;

/// The pair of capabilities a running service needs from its backend.
#[derive(Clone)]
pub struct Stores {
    /// Lease backend behind the distributed mutex.
    pub leases: Arc<dyn LeaseStore>,
    /// Row backend holding the aggregates.
    pub tables: Arc<dyn TableStore>,
}

impl Stores {
    /// Process-local stores, used for development runs and tests.
    pub fn in_memory(container: impl Into<String>) -> Self {
        Self {
            leases: Arc::new(memory::MemoryLeaseStore::new(container)),
            tables: Arc::new(memory::MemoryTableStore::new()),
        }
    }

    /// Use one backend value for both capabilities.
    pub fn shared<S>(store: S) -> Self
    where
        S: LeaseStore + TableStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            leases: store.clone(),
            tables: store,
        }
    }

    /// Check both capabilities, rows first.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.tables.health_check().await?;
        self.leases.health_check().await
    }

    /// Reconnect both capabilities in place.
    pub async fn try_reconnect(&self) -> StorageResult<()> {
        self.tables.try_reconnect().await?;
        self.leases.try_reconnect().await
    }
}
