use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

use crate::dao::{lease_store::LeaseError, storage::StorageError};

/// Result alias for MongoDB backend operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures of the MongoDB backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// A required environment variable is not set.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection URI did not parse.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver rejected the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: String,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// A row read failed.
    #[error("failed to read row `{key}` from `{table}`")]
    ReadRow {
        table: String,
        key: String,
        #[source]
        source: MongoError,
    },
    /// A row write failed.
    #[error("failed to write row `{key}` to `{table}`")]
    WriteRow {
        table: String,
        key: String,
        #[source]
        source: MongoError,
    },
    /// A lease operation failed.
    #[error("lease {operation} failed for `{key}`")]
    Lease {
        operation: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    /// The lease object was never created.
    #[error("lease object `{key}` does not exist in `{container}`")]
    MissingLease { container: String, key: String },
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}

impl From<MongoDaoError> for LeaseError {
    fn from(err: MongoDaoError) -> Self {
        LeaseError::Unavailable(err.into())
    }
}

/// Whether a write lost a race on a unique index (typically `_id`).
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}
