//! Cross-process mutual exclusion on top of a [`LeaseStore`].
//!
//! A lock is a lease on a placeholder object named after the lock key. The
//! holder keeps it alive with a [`RenewalSupervisor`] and gives it back with
//! [`DistributedMutex::release`]. Nothing but the lease guards the data and
//! writes are not fenced: a failed renewal only ends supervision, and the
//! lost lease shows up as [`LockError::ExpiredOnRelease`] when it is given back.

mod renewal;

use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::dao::{
    keys::{KeyError, sanitize_key},
    lease_store::{LeaseError, LeaseStore, LeaseToken},
    storage::StorageError,
};

pub use renewal::RenewalSupervisor;

/// Default lease length requested on acquire.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);
/// Default pause between two renewals of a held lease.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(10);
/// Default pause between two acquire attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
/// Default number of acquire attempts when retrying.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Bounded retry applied to `acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed sleep between attempts.
    pub interval: Duration,
    /// Total attempts, including the first one.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// Timing knobs of a [`DistributedMutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Lease length requested on acquire and on every renewal.
    pub lease_duration: Duration,
    /// Pause between renewals; keep it well below `lease_duration`.
    pub renew_interval: Duration,
    /// `None` fails fast on the first conflict.
    pub retry: Option<RetryPolicy>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            retry: None,
        }
    }
}

/// Lock lifecycle failures surfaced to callers.
#[derive(Debug, Error)]
pub enum LockError {
    /// Every acquire attempt found the lease held elsewhere.
    #[error("lock `{key}` is held elsewhere ({attempts} failed attempt(s))", attempts = .causes.len())]
    Contended {
        /// Sanitized lock key.
        key: String,
        /// One failure per attempt, oldest first.
        causes: Vec<LeaseError>,
    },
    /// The lease was lost before it could be renewed.
    #[error("lease on `{key}` expired before renewal")]
    ExpiredOnRenew {
        /// Sanitized lock key.
        key: String,
    },
    /// The lease was lost before it could be released.
    #[error("lease on `{key}` expired before release")]
    ExpiredOnRelease {
        /// Sanitized lock key.
        key: String,
    },
    /// The lease backend failed.
    #[error("lease backend unavailable for `{key}`")]
    Unavailable {
        /// Sanitized lock key.
        key: String,
        /// Last backend failure.
        #[source]
        source: StorageError,
    },
    /// The lock key is unusable.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

/// Proof of a held lease. Released at most once.
#[derive(Debug)]
pub struct LeaseHandle {
    key: String,
    token: LeaseToken,
    released: bool,
}

impl LeaseHandle {
    /// Sanitized lock key the lease was taken on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether [`DistributedMutex::release`] already ran for this handle.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Lease-backed mutex shared by every caller of one process.
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn LeaseStore>,
    settings: LockSettings,
}

impl DistributedMutex {
    /// Mutex over the leases of `store`.
    pub fn new(store: Arc<dyn LeaseStore>, settings: LockSettings) -> Self {
        Self { store, settings }
    }

    /// Take the lock for `key`, creating its lease object on first use.
    ///
    /// Without a retry policy the first conflict fails with
    /// [`LockError::Contended`]. With one, every failed attempt is collected
    /// and the call sleeps `interval` before the next. When no attempt saw a
    /// conflict the last backend failure is reported as
    /// [`LockError::Unavailable`].
    pub async fn acquire(&self, key: &str) -> Result<LeaseHandle, LockError> {
        let key = sanitize_key(key)?;
        let (attempts, interval) = match self.settings.retry {
            Some(policy) => (policy.attempts.max(1), policy.interval),
            None => (1, Duration::ZERO),
        };

        let mut causes = Vec::new();
        for attempt in 1..=attempts {
            match self.try_acquire(&key).await {
                Ok(token) => {
                    debug!(key = %key, attempt, "lock acquired");
                    return Ok(LeaseHandle {
                        key,
                        token,
                        released: false,
                    });
                }
                Err(err) => {
                    debug!(key = %key, attempt, error = %err, "lock attempt failed");
                    causes.push(err);
                }
            }
            if attempt < attempts {
                sleep(interval).await;
            }
        }

        if causes
            .iter()
            .all(|cause| matches!(cause, LeaseError::Unavailable(_)))
        {
            if let Some(LeaseError::Unavailable(source)) = causes.pop() {
                return Err(LockError::Unavailable { key, source });
            }
        }
        Err(LockError::Contended { key, causes })
    }

    async fn try_acquire(&self, key: &str) -> Result<LeaseToken, LeaseError> {
        self.store.ensure_object(key).await?;
        self.store
            .acquire_lease(key, self.settings.lease_duration)
            .await
    }

    /// Push the lease expiry out by another lease duration.
    pub async fn renew(&self, handle: &LeaseHandle) -> Result<(), LockError> {
        if handle.released {
            return Err(LockError::ExpiredOnRenew {
                key: handle.key.clone(),
            });
        }

        self.store
            .renew_lease(&handle.key, &handle.token, self.settings.lease_duration)
            .await
            .map_err(|err| match err {
                LeaseError::Unavailable(source) => LockError::Unavailable {
                    key: handle.key.clone(),
                    source,
                },
                LeaseError::Conflict { .. } | LeaseError::Expired { .. } => {
                    LockError::ExpiredOnRenew {
                        key: handle.key.clone(),
                    }
                }
            })
    }

    /// Give the lease back. A second call on the same handle is a no-op.
    ///
    /// The handle counts as released even when the backend reports the lease
    /// already lost.
    pub async fn release(&self, handle: &mut LeaseHandle) -> Result<(), LockError> {
        if handle.released {
            return Ok(());
        }
        handle.released = true;

        match self.store.release_lease(&handle.key, &handle.token).await {
            Ok(()) => {
                debug!(key = %handle.key, "lock released");
                Ok(())
            }
            Err(LeaseError::Unavailable(source)) => Err(LockError::Unavailable {
                key: handle.key.clone(),
                source,
            }),
            Err(LeaseError::Conflict { .. } | LeaseError::Expired { .. }) => {
                Err(LockError::ExpiredOnRelease {
                    key: handle.key.clone(),
                })
            }
        }
    }

    /// Start renewing `handle` in the background.
    pub fn supervise(&self, handle: &LeaseHandle) -> RenewalSupervisor {
        RenewalSupervisor::spawn(
            self.store.clone(),
            handle.key.clone(),
            handle.token.clone(),
            self.settings.renew_interval,
            self.settings.lease_duration,
        )
    }

    /// Release `handle` from a spawned task when the owner can no longer await.
    ///
    /// Used from `Drop` implementations; outside a tokio runtime the lease is
    /// left to expire.
    pub fn release_detached(&self, mut handle: LeaseHandle) {
        if handle.released {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let mutex = self.clone();
                runtime.spawn(async move {
                    if let Err(err) = mutex.release(&mut handle).await {
                        warn!(key = %handle.key, error = %err, "background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(key = %handle.key, "no runtime to release lock; lease will expire");
            }
        }
    }

    /// Run `op` while holding the lock for `key`.
    ///
    /// The lease is renewed while `op` runs and released afterwards, also when
    /// the returned future is dropped early.
    pub async fn run_exclusive<F, Fut, T>(&self, key: &str, op: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire(key).await?;
        let mut guard = ExclusiveGuard {
            renewal: Some(self.supervise(&handle)),
            handle: Some(handle),
            mutex: self,
        };

        let output = op().await;

        if let Some(renewal) = guard.renewal.take() {
            renewal.stop().await;
        }
        if let Some(mut handle) = guard.handle.take() {
            self.release(&mut handle).await?;
        }
        Ok(output)
    }
}

struct ExclusiveGuard<'a> {
    mutex: &'a DistributedMutex,
    handle: Option<LeaseHandle>,
    renewal: Option<RenewalSupervisor>,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        // Dropping the supervisor cancels renewal.
        self.renewal.take();
        if let Some(handle) = self.handle.take() {
            self.mutex.release_detached(handle);
        }
    }
}
