use std::{fmt, time::Duration};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::storage::{StorageError, StorageResult};

/// Result alias for lease operations.
pub type LeaseResult<T> = Result<T, LeaseError>;

/// Opaque identifier of one lease grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Mint a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LeaseToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures reported by a lease backend.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Another holder owns a live lease on the object.
    #[error("lease on `{key}` is already held")]
    Conflict {
        /// Lease object key.
        key: String,
    },
    /// The presented token no longer owns the lease (expired or taken over).
    #[error("lease on `{key}` expired or is owned by another token")]
    Expired {
        /// Lease object key.
        key: String,
    },
    /// The backend could not be reached or failed unexpectedly.
    #[error(transparent)]
    Unavailable(#[from] StorageError),
}

/// Object store exposing exclusive, time-bounded leases on named objects.
pub trait LeaseStore: Send + Sync {
    /// Create the placeholder object for `key` when it does not exist yet.
    fn ensure_object(&self, key: &str) -> BoxFuture<'static, LeaseResult<()>>;
    /// Take a lease on `key` for `ttl`, failing with [`LeaseError::Conflict`] when held.
    fn acquire_lease(&self, key: &str, ttl: Duration) -> BoxFuture<'static, LeaseResult<LeaseToken>>;
    /// Push the expiry of a held lease `ttl` into the future.
    fn renew_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> BoxFuture<'static, LeaseResult<()>>;
    /// Give a held lease back.
    fn release_lease(&self, key: &str, token: &LeaseToken) -> BoxFuture<'static, LeaseResult<()>>;
    /// Verify the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Wall-clock milliseconds since the Unix epoch, used by backends that persist lease expiry.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
