use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use mongodb::{
    Collection, Database, IndexModel,
    bson::doc,
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoLeaseDocument, MongoRowDocument, holder_filter, id_filter, row_id, vacant_filter,
    },
};
use crate::dao::{
    lease_store::{LeaseError, LeaseResult, LeaseStore, LeaseToken, now_millis},
    models::{ETag, TableRow, row_identity},
    storage::{StorageError, StorageResult},
    table_store::TableStore,
};

/// MongoDB-backed row and lease store.
///
/// Rows live in one collection per table; lease placeholders live in the
/// collection named after the lock container.
#[derive(Clone)]
pub struct MongoStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    container: String,
}

struct MongoState {
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        self.state.write().await.database = database;
        Ok(())
    }
}

impl MongoStore {
    /// Connect to MongoDB and prepare the lease collection for `container`.
    pub async fn connect(config: MongoConfig, container: impl Into<String>) -> MongoResult<Self> {
        let database = establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { database }),
                config,
                container: container.into(),
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "token": 1, "expires_at_ms": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("lease_holder_idx".to_owned()))
                    .build(),
            )
            .build();

        self.leases()
            .await
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: self.inner.container.clone(),
                index: "token,expires_at_ms",
                source,
            })?;
        Ok(())
    }

    async fn rows(&self, table: &str) -> Collection<MongoRowDocument> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<MongoRowDocument>(table)
    }

    async fn leases(&self) -> Collection<MongoLeaseDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoLeaseDocument>(&self.inner.container)
    }

    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> MongoResult<Option<TableRow>> {
        let document = self
            .rows(table)
            .await
            .find_one(id_filter(&row_id(partition_key, row_key)))
            .await
            .map_err(|source| MongoDaoError::ReadRow {
                table: table.to_owned(),
                key: row_identity(partition_key, row_key),
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn upsert_row(&self, table: &str, row: TableRow, etag: ETag) -> StorageResult<TableRow> {
        let key = row_identity(&row.partition_key, &row.row_key);
        let document = MongoRowDocument::from_row(row, Uuid::new_v4().to_string());
        let collection = self.rows(table).await;
        let write_error = |source| MongoDaoError::WriteRow {
            table: table.to_owned(),
            key: key.clone(),
            source,
        };

        match etag {
            ETag::Any => {
                collection
                    .replace_one(id_filter(&document.id), &document)
                    .upsert(true)
                    .await
                    .map_err(write_error)?;
            }
            ETag::Matches(expected) => {
                let result = collection
                    .replace_one(doc! { "_id": document.id.as_str(), "etag": expected }, &document)
                    .await
                    .map_err(write_error)?;
                if result.matched_count == 0 {
                    return Err(StorageError::PreconditionFailed {
                        table: table.to_owned(),
                        key,
                    });
                }
            }
        }

        Ok(document.into())
    }

    async fn ensure_lease_document(&self, key: &str) -> MongoResult<()> {
        let result = self
            .leases()
            .await
            .update_one(
                id_filter(key),
                doc! { "$setOnInsert": { "token": null, "expires_at_ms": 0_i64 } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Lost the insert race to another caller; the document exists.
            Err(err) if is_duplicate_key(&err) => Ok(()),
            Err(source) => Err(MongoDaoError::Lease {
                operation: "create",
                key: key.to_owned(),
                source,
            }),
        }
    }

    async fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<LeaseToken> {
        let lease_error = |source| MongoDaoError::Lease {
            operation: "acquire",
            key: key.to_owned(),
            source,
        };
        let collection = self.leases().await;
        let now = now_millis();
        let token = LeaseToken::generate();

        let updated = collection
            .find_one_and_update(
                vacant_filter(key, now),
                doc! { "$set": {
                    "token": token.as_str(),
                    "expires_at_ms": now.saturating_add(ttl_millis(ttl)),
                } },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(lease_error)?;
        if updated.is_some() {
            return Ok(token);
        }

        let exists = collection
            .find_one(id_filter(key))
            .await
            .map_err(lease_error)?
            .is_some();
        if exists {
            Err(LeaseError::Conflict {
                key: key.to_owned(),
            })
        } else {
            Err(MongoDaoError::MissingLease {
                container: self.inner.container.clone(),
                key: key.to_owned(),
            }
            .into())
        }
    }

    async fn renew(&self, key: &str, token: &LeaseToken, ttl: Duration) -> LeaseResult<()> {
        let now = now_millis();
        let result = self
            .leases()
            .await
            .update_one(
                holder_filter(key, token.as_str(), now),
                doc! { "$set": { "expires_at_ms": now.saturating_add(ttl_millis(ttl)) } },
            )
            .await
            .map_err(|source| MongoDaoError::Lease {
                operation: "renew",
                key: key.to_owned(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(LeaseError::Expired {
                key: key.to_owned(),
            });
        }
        Ok(())
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> LeaseResult<()> {
        let result = self
            .leases()
            .await
            .update_one(
                holder_filter(key, token.as_str(), now_millis()),
                doc! { "$set": { "token": null, "expires_at_ms": 0_i64 } },
            )
            .await
            .map_err(|source| MongoDaoError::Lease {
                operation: "release",
                key: key.to_owned(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(LeaseError::Expired {
                key: key.to_owned(),
            });
        }
        Ok(())
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

impl TableStore for MongoStore {
    fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<TableRow>>> {
        let store = self.clone();
        let (table, partition_key, row_key) =
            (table.to_owned(), partition_key.to_owned(), row_key.to_owned());
        Box::pin(async move {
            store
                .get_row(&table, &partition_key, &row_key)
                .await
                .map_err(Into::into)
        })
    }

    fn upsert(
        &self,
        table: &str,
        row: TableRow,
        etag: ETag,
    ) -> BoxFuture<'static, StorageResult<TableRow>> {
        let store = self.clone();
        let table = table.to_owned();
        Box::pin(async move { store.upsert_row(&table, row, etag).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

impl LeaseStore for MongoStore {
    fn ensure_object(&self, key: &str) -> BoxFuture<'static, LeaseResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.ensure_lease_document(&key).await.map_err(Into::into) })
    }

    fn acquire_lease(&self, key: &str, ttl: Duration) -> BoxFuture<'static, LeaseResult<LeaseToken>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.acquire(&key, ttl).await })
    }

    fn renew_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> BoxFuture<'static, LeaseResult<()>> {
        let store = self.clone();
        let (key, token) = (key.to_owned(), token.clone());
        Box::pin(async move { store.renew(&key, &token, ttl).await })
    }

    fn release_lease(&self, key: &str, token: &LeaseToken) -> BoxFuture<'static, LeaseResult<()>> {
        let store = self.clone();
        let (key, token) = (key.to_owned(), token.clone());
        Box::pin(async move { store.release(&key, &token).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
