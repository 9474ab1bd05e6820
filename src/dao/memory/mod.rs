//! Process-local stores used for development runs and tests.
//!
//! They honour the same lease and etag contracts as the networked backends but
//! only coordinate callers sharing one process.

mod lease_store;
mod table_store;

use thiserror::Error;

pub use lease_store::MemoryLeaseStore;
pub use table_store::MemoryTableStore;

/// Failures specific to the in-memory backends.
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// A lease was requested on an object that was never created.
    #[error("lease object `{key}` does not exist in container `{container}`")]
    MissingObject {
        /// Container the store is scoped to.
        container: String,
        /// Requested object key.
        key: String,
    },
}
