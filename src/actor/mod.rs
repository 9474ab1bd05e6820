//! Actor-style access to table entities: one writer per key across processes.
//!
//! A write opens the entity under its lock, mutates it in memory and flushes,
//! which persists and releases in one step.

mod locked;

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::{
    dao::{
        entity::{TableEntity, decode},
        keys::{KeyError, lock_key, sanitize_key},
        storage::StorageError,
        table_store::TableStore,
    },
    lock::{DistributedMutex, LockError},
};

pub use locked::LockedEntity;

/// Failures of the locked-entity layer.
#[derive(Debug, Error)]
pub enum EntityError {
    /// The lock could not be taken or given back.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Reading or writing the row failed.
    #[error(transparent)]
    Store(#[from] StorageError),
    /// A key was empty after sanitization.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

/// Opens entities of any [`TableEntity`] type under their lock.
#[derive(Clone)]
pub struct EntityClient {
    mutex: DistributedMutex,
    tables: Arc<dyn TableStore>,
}

impl EntityClient {
    /// Client locking through `mutex` and storing rows in `tables`.
    pub fn new(mutex: DistributedMutex, tables: Arc<dyn TableStore>) -> Self {
        Self { mutex, tables }
    }

    /// Lock `(partition_key, row_key)` and load the entity, creating a default
    /// one when the row does not exist.
    pub async fn get_locked<T: TableEntity>(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<LockedEntity<T>, EntityError> {
        let key = lock_key(partition_key, row_key)?;
        let partition_key = sanitize_key(partition_key)?;
        let row_key = sanitize_key(row_key)?;

        let handle = self.mutex.acquire(&key).await?;
        // Owned from here on, so a cancelled read still gives the lease back on drop.
        let mut locked = LockedEntity::new(
            T::with_keys(partition_key.clone(), row_key.clone()),
            handle,
            self.mutex.clone(),
            self.tables.clone(),
        );

        let loaded = self
            .tables
            .get(T::TABLE, &partition_key, &row_key)
            .await
            .and_then(|row| row.map(decode::<T>).transpose());
        match loaded {
            Ok(Some(entity)) => {
                locked.load(entity);
                Ok(locked)
            }
            Ok(None) => Ok(locked),
            Err(err) => {
                if let Err(release_err) = locked.abandon().await {
                    warn!(key = %key, error = %release_err, "failed to release lock after load failure");
                }
                Err(err.into())
            }
        }
    }

    /// Read the entity without locking, `None` when it does not exist.
    pub async fn get<T: TableEntity>(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<T>, EntityError> {
        let partition_key = sanitize_key(partition_key)?;
        let row_key = sanitize_key(row_key)?;
        match self.tables.get(T::TABLE, &partition_key, &row_key).await? {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }

    /// Apply `mutation` under the lock.
    ///
    /// `Ok` flushes and returns the stored entity with the mutation output.
    /// `Err` releases the lock without persisting and hands the error back.
    pub async fn mutate<T, R, E, F>(
        &self,
        partition_key: &str,
        row_key: &str,
        mutation: F,
    ) -> Result<(T, R), E>
    where
        T: TableEntity + Clone,
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<EntityError>,
    {
        let mut locked = self.get_locked::<T>(partition_key, row_key).await?;
        match mutation(locked.entity_mut()) {
            Ok(output) => {
                locked.flush().await?;
                Ok((locked.entity().clone(), output))
            }
            Err(err) => {
                if let Err(release_err) = locked.abandon().await {
                    warn!(error = %release_err, "failed to release lock after rejected mutation");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use futures::future::BoxFuture;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        dao::{
            memory::{MemoryLeaseStore, MemoryTableStore},
            models::{ETag, TableRow},
            storage::StorageResult,
        },
        lock::LockSettings,
    };

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Counter {
        partition_key: String,
        row_key: String,
        #[serde(default)]
        version: u64,
        #[serde(default)]
        hits: Vec<u32>,
    }

    impl TableEntity for Counter {
        const TABLE: &'static str = "counters";
        const STRUCTURED_FIELDS: &'static [&'static str] = &["hits"];

        fn with_keys(partition_key: String, row_key: String) -> Self {
            Self {
                partition_key,
                row_key,
                version: 0,
                hits: Vec::new(),
            }
        }

        fn keys(&self) -> (&str, &str) {
            (&self.partition_key, &self.row_key)
        }

        fn version(&self) -> u64 {
            self.version
        }

        fn set_version(&mut self, version: u64) {
            self.version = version;
        }
    }

    /// Table store that can be switched into failing writes.
    #[derive(Clone, Default)]
    struct FlakyTables {
        inner: MemoryTableStore,
        fail_writes: Arc<AtomicBool>,
    }

    impl TableStore for FlakyTables {
        fn get(&self, table: &str, pk: &str, rk: &str) -> BoxFuture<'static, StorageResult<Option<TableRow>>> {
            self.inner.get(table, pk, rk)
        }

        fn upsert(&self, table: &str, row: TableRow, etag: ETag) -> BoxFuture<'static, StorageResult<TableRow>> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(StorageError::unavailable(
                        "write refused".into(),
                        std::io::Error::other("refused"),
                    ))
                });
            }
            self.inner.upsert(table, row, etag)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    /// Table store whose reads take a full second.
    #[derive(Clone, Default)]
    struct SlowTables {
        inner: MemoryTableStore,
    }

    impl TableStore for SlowTables {
        fn get(&self, table: &str, pk: &str, rk: &str) -> BoxFuture<'static, StorageResult<Option<TableRow>>> {
            let read = self.inner.get(table, pk, rk);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                read.await
            })
        }

        fn upsert(&self, table: &str, row: TableRow, etag: ETag) -> BoxFuture<'static, StorageResult<TableRow>> {
            self.inner.upsert(table, row, etag)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    struct Fixture {
        client: EntityClient,
        tables: FlakyTables,
    }

    fn fixture() -> Fixture {
        let tables = FlakyTables::default();
        let mutex = DistributedMutex::new(
            Arc::new(MemoryLeaseStore::new("locks")),
            LockSettings::default(),
        );
        Fixture {
            client: EntityClient::new(mutex, Arc::new(tables.clone())),
            tables,
        }
    }

    async fn stored_version(client: &EntityClient) -> Option<u64> {
        client
            .get::<Counter>("game", "demo")
            .await
            .unwrap()
            .map(|counter| counter.version)
    }

    #[tokio::test]
    async fn missing_row_opens_as_new_and_flush_persists_version_one() {
        let Fixture { client, .. } = fixture();

        let mut locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        assert!(locked.is_new());
        assert_eq!(locked.entity().version, 0);
        assert_eq!(locked.etag(), &ETag::Any);

        locked.entity_mut().hits.push(7);
        locked.flush().await.unwrap();

        assert!(locked.is_released());
        assert!(!locked.is_new());
        assert_eq!(locked.entity().version, 1);
        assert_eq!(stored_version(&client).await, Some(1));

        let reopened = client.get_locked::<Counter>("game", "demo").await.unwrap();
        assert!(!reopened.is_new());
        assert_eq!(reopened.entity().hits, vec![7]);
        reopened.abandon().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_open_is_contended() {
        let Fixture { client, .. } = fixture();

        let held = client.get_locked::<Counter>("game", "demo").await.unwrap();
        let second = client.get_locked::<Counter>("game", "demo").await;
        assert!(matches!(
            second,
            Err(EntityError::Lock(LockError::Contended { .. }))
        ));

        held.close().await.unwrap();
        client
            .get_locked::<Counter>("game", "demo")
            .await
            .unwrap()
            .abandon()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn successive_flushes_bump_the_version_once_each() {
        let Fixture { client, .. } = fixture();

        for expected in 1..=3 {
            let (counter, ()) = client
                .mutate("game", "demo", |counter: &mut Counter| {
                    counter.hits.push(expected as u32);
                    Ok::<_, EntityError>(())
                })
                .await
                .unwrap();
            assert_eq!(counter.version, expected);
        }
        assert_eq!(stored_version(&client).await, Some(3));
    }

    #[tokio::test]
    async fn second_flush_is_a_no_op() {
        let Fixture { client, .. } = fixture();

        let mut locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        locked.flush().await.unwrap();
        locked.entity_mut().hits.push(1);
        locked.flush().await.unwrap();

        assert_eq!(locked.entity().version, 1);
        let stored = client.get::<Counter>("game", "demo").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.hits.is_empty());
    }

    #[derive(Debug, PartialEq)]
    enum Rejection {
        Entity,
        Refused,
    }

    impl From<EntityError> for Rejection {
        fn from(_: EntityError) -> Self {
            Rejection::Entity
        }
    }

    #[tokio::test]
    async fn rejected_mutation_releases_without_persisting() {
        let Fixture { client, .. } = fixture();

        let result = client
            .mutate("game", "demo", |counter: &mut Counter| {
                counter.hits.push(1);
                Err::<(), _>(Rejection::Refused)
            })
            .await;
        assert_eq!(result.unwrap_err(), Rejection::Refused);

        assert_eq!(stored_version(&client).await, None);
        client
            .get_locked::<Counter>("game", "demo")
            .await
            .unwrap()
            .abandon()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_entity_releases_in_the_background() {
        let Fixture { client, .. } = fixture();

        let mut locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        locked.entity_mut().hits.push(1);
        drop(locked);

        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        let reopened = client.get_locked::<Counter>("game", "demo").await.unwrap();
        assert!(reopened.is_new());
        reopened.abandon().await.unwrap();
    }

    #[tokio::test]
    async fn failed_upsert_restores_version_and_still_releases() {
        let Fixture { client, tables } = fixture();
        tables.fail_writes.store(true, Ordering::SeqCst);

        let mut locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        let err = locked.flush().await.unwrap_err();
        assert!(matches!(err, EntityError::Store(StorageError::Unavailable { .. })));
        assert_eq!(locked.entity().version, 0);
        assert!(locked.is_released());

        tables.fail_writes.store(false, Ordering::SeqCst);
        let again = client.get_locked::<Counter>("game", "demo").await.unwrap();
        again.close().await.unwrap();
        assert_eq!(stored_version(&client).await, Some(1));
    }

    #[tokio::test]
    async fn keys_are_sanitized_before_use() {
        let Fixture { client, .. } = fixture();

        let locked = client
            .get_locked::<Counter>("game", "de/mo?")
            .await
            .unwrap();
        assert_eq!(locked.entity().keys(), ("game", "demo"));
        locked.close().await.unwrap();

        assert_eq!(stored_version(&client).await, Some(1));
        assert!(matches!(
            client.get::<Counter>("", "demo").await,
            Err(EntityError::InvalidKey(KeyError::Empty))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn long_mutation_keeps_the_lock_through_renewal() {
        let tables = MemoryTableStore::new();
        let mutex = DistributedMutex::new(
            Arc::new(MemoryLeaseStore::new("locks")),
            LockSettings {
                lease_duration: Duration::from_secs(2),
                renew_interval: Duration::from_millis(500),
                retry: None,
            },
        );
        let client = EntityClient::new(mutex, Arc::new(tables));

        let locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(matches!(
            client.get_locked::<Counter>("game", "demo").await,
            Err(EntityError::Lock(LockError::Contended { .. }))
        ));
        locked.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_cancelled_during_the_read_gives_the_lock_back() {
        let mutex = DistributedMutex::new(
            Arc::new(MemoryLeaseStore::new("locks")),
            LockSettings::default(),
        );
        let client = EntityClient::new(mutex, Arc::new(SlowTables::default()));

        let opening = tokio::time::timeout(
            Duration::from_millis(100),
            client.get_locked::<Counter>("game", "demo"),
        )
        .await;
        assert!(opening.is_err());

        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        let reopened = client.get_locked::<Counter>("game", "demo").await.unwrap();
        assert!(reopened.is_new());
        reopened.abandon().await.unwrap();
    }

    fn short_lease_client() -> EntityClient {
        let mutex = DistributedMutex::new(
            Arc::new(MemoryLeaseStore::new("locks")),
            LockSettings {
                lease_duration: Duration::from_secs(1),
                renew_interval: Duration::from_secs(30),
                retry: None,
            },
        );
        EntityClient::new(mutex, Arc::new(MemoryTableStore::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn lease_lost_mid_hold_keeps_the_flushed_write() {
        let client = short_lease_client();

        let mut locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        locked.entity_mut().hits.push(4);
        tokio::time::sleep(Duration::from_secs(2)).await;

        locked.flush().await.unwrap();
        assert!(locked.is_released());
        assert_eq!(locked.entity().version, 1);

        let stored = client.get::<Counter>("game", "demo").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.hits, vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_an_expired_lease_still_reports_it() {
        let client = short_lease_client();

        let locked = client.get_locked::<Counter>("game", "demo").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(matches!(
            locked.abandon().await,
            Err(EntityError::Lock(LockError::ExpiredOnRelease { .. }))
        ));
        assert_eq!(stored_version(&client).await, None);
    }
}
