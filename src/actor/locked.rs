use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    dao::{
        entity::{TableEntity, decode, encode},
        models::ETag,
        storage::StorageResult,
        table_store::TableStore,
    },
    lock::{DistributedMutex, LeaseHandle, LockError, RenewalSupervisor},
};

use super::EntityError;

/// An aggregate loaded under its lock.
///
/// The lock is held from load until [`flush`](Self::flush),
/// [`close`](Self::close) or [`abandon`](Self::abandon). Dropping a still
/// held entity releases the lease in the background without persisting.
pub struct LockedEntity<T: TableEntity> {
    entity: T,
    etag: ETag,
    is_new: bool,
    handle: Option<LeaseHandle>,
    renewal: Option<RenewalSupervisor>,
    mutex: DistributedMutex,
    tables: Arc<dyn TableStore>,
}

impl<T: TableEntity> LockedEntity<T> {
    /// Take ownership of a freshly acquired lease and start renewing it.
    ///
    /// The entity counts as new until [`load`](Self::load) replaces it.
    pub(super) fn new(
        entity: T,
        handle: LeaseHandle,
        mutex: DistributedMutex,
        tables: Arc<dyn TableStore>,
    ) -> Self {
        let renewal = mutex.supervise(&handle);
        Self {
            entity,
            etag: ETag::Any,
            is_new: true,
            handle: Some(handle),
            renewal: Some(renewal),
            mutex,
            tables,
        }
    }

    pub(super) fn load(&mut self, stored: T) {
        self.entity = stored;
        self.is_new = false;
    }

    /// The entity as loaded or last flushed.
    pub fn entity(&self) -> &T {
        &self.entity
    }

    /// Mutable access for changes that the next flush persists.
    pub fn entity_mut(&mut self) -> &mut T {
        &mut self.entity
    }

    /// Whether the row did not exist when the lock was taken.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Write condition used on flush; always the wildcard while locked.
    pub fn etag(&self) -> &ETag {
        &self.etag
    }

    /// Whether the lock has already been given back.
    pub fn is_released(&self) -> bool {
        self.handle.as_ref().is_none_or(LeaseHandle::is_released)
    }

    /// Persist the entity with a bumped version, then release the lock.
    ///
    /// Once released this is a no-op. The lock is released whatever the
    /// upsert outcome; on failure the in-memory version is restored. A lease
    /// found expired at release time is only logged once the write is stored.
    pub async fn flush(&mut self) -> Result<(), EntityError> {
        if self.is_released() {
            return Ok(());
        }

        let previous = self.entity.version();
        self.entity.set_version(previous + 1);
        let persisted = match self.persist().await {
            Ok(stored) => {
                self.entity = stored;
                self.is_new = false;
                Ok(())
            }
            Err(err) => {
                self.entity.set_version(previous);
                Err(err)
            }
        };

        let released = self.release().await;
        match (persisted, released) {
            (Ok(()), Ok(())) => {
                debug!(table = T::TABLE, version = self.entity.version(), "entity flushed");
                Ok(())
            }
            (Ok(()), Err(LockError::ExpiredOnRelease { key })) => {
                warn!(key = %key, version = self.entity.version(), "lease expired before release; flushed write kept");
                Ok(())
            }
            (Ok(()), Err(lock)) => Err(lock.into()),
            (Err(store), Ok(())) => Err(store.into()),
            (Err(store), Err(lock)) => {
                warn!(error = %lock, "lock release failed after a failed flush");
                Err(store.into())
            }
        }
    }

    /// Flush if still held, then dispose of the handle.
    pub async fn close(mut self) -> Result<(), EntityError> {
        self.flush().await
    }

    /// Release the lock without persisting anything.
    pub async fn abandon(mut self) -> Result<(), EntityError> {
        self.release().await.map_err(Into::into)
    }

    async fn persist(&self) -> StorageResult<T> {
        let row = encode(&self.entity, None)?;
        let stored = self.tables.upsert(T::TABLE, row, self.etag.clone()).await?;
        decode(stored)
    }

    async fn release(&mut self) -> Result<(), LockError> {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }
        match self.handle.as_mut() {
            Some(handle) => self.mutex.release(handle).await,
            None => Ok(()),
        }
    }
}

impl<T: TableEntity> Drop for LockedEntity<T> {
    fn drop(&mut self) {
        self.renewal.take();
        if let Some(handle) = self.handle.take() {
            if !handle.is_released() {
                debug!(key = %handle.key(), "locked entity dropped while held; releasing without persisting");
                self.mutex.release_detached(handle);
            }
        }
    }
}
