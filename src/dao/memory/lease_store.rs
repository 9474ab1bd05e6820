use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::dao::{
    lease_store::{LeaseError, LeaseResult, LeaseStore, LeaseToken},
    storage::{StorageError, StorageResult},
};

use super::MemoryStoreError;

#[derive(Debug, Default)]
struct LeaseSlot {
    holder: Option<ActiveLease>,
}

#[derive(Debug)]
struct ActiveLease {
    token: LeaseToken,
    expires_at: Instant,
}

impl LeaseSlot {
    fn live_holder(&self, now: Instant) -> Option<&ActiveLease> {
        self.holder.as_ref().filter(|lease| lease.expires_at > now)
    }
}

/// Lease store keeping placeholder objects in a concurrent map.
#[derive(Clone)]
pub struct MemoryLeaseStore {
    container: Arc<str>,
    objects: Arc<DashMap<String, LeaseSlot>>,
}

impl MemoryLeaseStore {
    /// Create an empty store scoped to `container`.
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: Arc::from(container.into()),
            objects: Arc::new(DashMap::new()),
        }
    }

    fn missing(&self, key: &str) -> LeaseError {
        let err = MemoryStoreError::MissingObject {
            container: self.container.to_string(),
            key: key.to_owned(),
        };
        LeaseError::Unavailable(StorageError::unavailable(err.to_string(), err))
    }

    fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<LeaseToken> {
        let mut slot = self.objects.get_mut(key).ok_or_else(|| self.missing(key))?;
        let now = Instant::now();
        if slot.live_holder(now).is_some() {
            return Err(LeaseError::Conflict {
                key: key.to_owned(),
            });
        }

        let token = LeaseToken::generate();
        slot.holder = Some(ActiveLease {
            token: token.clone(),
            expires_at: now + ttl,
        });
        Ok(token)
    }

    fn renew(&self, key: &str, token: &LeaseToken, ttl: Duration) -> LeaseResult<()> {
        let mut slot = self.objects.get_mut(key).ok_or_else(|| self.missing(key))?;
        let now = Instant::now();
        match slot.holder.as_mut() {
            Some(lease) if lease.token == *token && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LeaseError::Expired {
                key: key.to_owned(),
            }),
        }
    }

    fn release(&self, key: &str, token: &LeaseToken) -> LeaseResult<()> {
        let mut slot = self.objects.get_mut(key).ok_or_else(|| self.missing(key))?;
        let now = Instant::now();
        match slot.live_holder(now) {
            Some(lease) if lease.token == *token => {
                slot.holder = None;
                Ok(())
            }
            _ => Err(LeaseError::Expired {
                key: key.to_owned(),
            }),
        }
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn ensure_object(&self, key: &str) -> BoxFuture<'static, LeaseResult<()>> {
        self.objects.entry(key.to_owned()).or_default();
        Box::pin(async { Ok(()) })
    }

    fn acquire_lease(&self, key: &str, ttl: Duration) -> BoxFuture<'static, LeaseResult<LeaseToken>> {
        let result = self.acquire(key, ttl);
        Box::pin(async move { result })
    }

    fn renew_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> BoxFuture<'static, LeaseResult<()>> {
        let result = self.renew(key, token, ttl);
        Box::pin(async move { result })
    }

    fn release_lease(&self, key: &str, token: &LeaseToken) -> BoxFuture<'static, LeaseResult<()>> {
        let result = self.release(key, token);
        Box::pin(async move { result })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn acquire_requires_the_object() {
        let store = MemoryLeaseStore::new("locks");
        let err = store.acquire_lease("k", TTL).await.unwrap_err();
        assert!(matches!(err, LeaseError::Unavailable(_)));
    }

    #[tokio::test]
    async fn second_acquire_conflicts_until_release() {
        let store = MemoryLeaseStore::new("locks");
        store.ensure_object("k").await.unwrap();

        let token = store.acquire_lease("k", TTL).await.unwrap();
        let err = store.acquire_lease("k", TTL).await.unwrap_err();
        assert!(matches!(err, LeaseError::Conflict { .. }));

        store.release_lease("k", &token).await.unwrap();
        store.acquire_lease("k", TTL).await.unwrap();
    }

    #[tokio::test]
    async fn ensure_object_keeps_existing_lease() {
        let store = MemoryLeaseStore::new("locks");
        store.ensure_object("k").await.unwrap();
        let _token = store.acquire_lease("k", TTL).await.unwrap();

        store.ensure_object("k").await.unwrap();
        assert!(matches!(
            store.acquire_lease("k", TTL).await,
            Err(LeaseError::Conflict { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_taken_over() {
        let store = MemoryLeaseStore::new("locks");
        store.ensure_object("k").await.unwrap();
        let stale = store.acquire_lease("k", Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let fresh = store.acquire_lease("k", TTL).await.unwrap();
        assert_ne!(stale, fresh);
        assert!(matches!(
            store.release_lease("k", &stale).await,
            Err(LeaseError::Expired { .. })
        ));
        assert!(matches!(
            store.renew_lease("k", &stale, TTL).await,
            Err(LeaseError::Expired { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn renew_extends_expiry() {
        let store = MemoryLeaseStore::new("locks");
        store.ensure_object("k").await.unwrap();
        let token = store.acquire_lease("k", Duration::from_secs(2)).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        store
            .renew_lease("k", &token, Duration::from_secs(2))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;

        assert!(matches!(
            store.acquire_lease("k", TTL).await,
            Err(LeaseError::Conflict { .. })
        ));
        store.release_lease("k", &token).await.unwrap();
    }
}
