use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A conditional write was rejected because the stored etag moved on.
    #[error("etag precondition failed for `{table}` row `{key}`")]
    PreconditionFailed {
        /// Table of the rejected row.
        table: String,
        /// `pk/rk` identity of the row.
        key: String,
    },
    /// A row could not be translated to or from its typed entity.
    #[error("failed to convert `{table}` row `{key}`")]
    Codec {
        /// Table of the row.
        table: String,
        /// `pk/rk` identity of the row.
        key: String,
        /// Serde failure.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
