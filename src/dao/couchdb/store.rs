use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::dao::{
    lease_store::{LeaseError, LeaseResult, LeaseStore, LeaseToken, now_millis},
    models::{ETag, TableRow, row_identity},
    storage::{StorageError, StorageResult},
    table_store::TableStore,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchLeaseDocument, CouchRowDocument, WriteResponse, lease_doc_id, row_doc_id},
};

const UNCONDITIONAL_WRITE_ATTEMPTS: u32 = 3;

enum WriteOutcome {
    Written { rev: String },
    RevisionConflict,
}

/// CouchDB-backed row and lease store sharing one database.
///
/// Rows and lease placeholders are plain documents; every conditional update
/// relies on CouchDB's `_rev` check.
#[derive(Clone)]
pub struct CouchStore {
    client: Client,
    config: Arc<CouchConfig>,
    container: Arc<str>,
}

impl CouchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig, container: impl Into<String>) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            config: Arc::new(config),
            container: Arc::from(container.into()),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.credentials {
            Some(credentials) => {
                builder.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.config.database.clone();
        let url = self.config.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_owned(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<WriteOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(WriteOutcome::RevisionConflict),
            status if status.is_success() => {
                let body = response.json::<WriteResponse>().await.map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_owned(),
                        source,
                    }
                })?;
                Ok(WriteOutcome::Written { rev: body.rev })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> CouchResult<Option<TableRow>> {
        let doc_id = row_doc_id(table, partition_key, row_key);
        let doc = self.get_document::<CouchRowDocument>(&doc_id).await?;
        Ok(doc.map(CouchRowDocument::into_row))
    }

    async fn upsert_row(&self, table: &str, row: TableRow, etag: ETag) -> StorageResult<TableRow> {
        let doc_id = row_doc_id(table, &row.partition_key, &row.row_key);

        let expected = match etag {
            ETag::Matches(rev) => Some(rev),
            ETag::Any => None,
        };
        if let Some(rev) = expected {
            let doc = CouchRowDocument::from_row(table, row.clone(), Some(rev));
            return match self.put_document(&doc_id, &doc).await? {
                WriteOutcome::Written { rev } => Ok(TableRow {
                    etag: Some(rev),
                    ..row
                }),
                WriteOutcome::RevisionConflict => Err(StorageError::PreconditionFailed {
                    table: table.to_owned(),
                    key: row_identity(&row.partition_key, &row.row_key),
                }),
            };
        }

        for attempt in 1..=UNCONDITIONAL_WRITE_ATTEMPTS {
            let current = self
                .get_document::<CouchRowDocument>(&doc_id)
                .await?
                .and_then(|doc| doc.rev);
            let doc = CouchRowDocument::from_row(table, row.clone(), current);
            match self.put_document(&doc_id, &doc).await? {
                WriteOutcome::Written { rev } => {
                    return Ok(TableRow {
                        etag: Some(rev),
                        ..row
                    });
                }
                WriteOutcome::RevisionConflict => {
                    debug!(doc_id = %doc_id, attempt, "row revision moved during overwrite");
                }
            }
        }

        Err(CouchDaoError::RevisionChurn {
            doc_id,
            attempts: UNCONDITIONAL_WRITE_ATTEMPTS,
        }
        .into())
    }

    async fn lease_document(&self, key: &str) -> LeaseResult<CouchLeaseDocument> {
        let doc_id = lease_doc_id(&self.container, key);
        match self.get_document::<CouchLeaseDocument>(&doc_id).await? {
            Some(doc) => Ok(doc),
            None => Err(CouchDaoError::MissingLease { doc_id }.into()),
        }
    }

    async fn ensure_lease_document(&self, key: &str) -> LeaseResult<()> {
        let doc_id = lease_doc_id(&self.container, key);
        if self
            .get_document::<CouchLeaseDocument>(&doc_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        // A revision conflict means a concurrent caller created it.
        self.put_document(&doc_id, &CouchLeaseDocument::vacant(doc_id.clone()))
            .await?;
        Ok(())
    }

    async fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<LeaseToken> {
        let mut doc = self.lease_document(key).await?;
        let now = now_millis();
        if doc.live_token(now).is_some() {
            return Err(LeaseError::Conflict {
                key: key.to_owned(),
            });
        }

        let token = LeaseToken::generate();
        doc.token = Some(token.as_str().to_owned());
        doc.expires_at_ms = now.saturating_add(ttl_millis(ttl));
        match self.put_document(&doc.id, &doc).await? {
            WriteOutcome::Written { .. } => Ok(token),
            WriteOutcome::RevisionConflict => Err(LeaseError::Conflict {
                key: key.to_owned(),
            }),
        }
    }

    async fn renew(&self, key: &str, token: &LeaseToken, ttl: Duration) -> LeaseResult<()> {
        let expired = || LeaseError::Expired {
            key: key.to_owned(),
        };
        let mut doc = self.lease_document(key).await?;
        let now = now_millis();
        if doc.live_token(now) != Some(token.as_str()) {
            return Err(expired());
        }

        doc.expires_at_ms = now.saturating_add(ttl_millis(ttl));
        match self.put_document(&doc.id, &doc).await? {
            WriteOutcome::Written { .. } => Ok(()),
            WriteOutcome::RevisionConflict => Err(expired()),
        }
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> LeaseResult<()> {
        let expired = || LeaseError::Expired {
            key: key.to_owned(),
        };
        let doc = self.lease_document(key).await?;
        if doc.live_token(now_millis()) != Some(token.as_str()) {
            return Err(expired());
        }

        let vacant = CouchLeaseDocument {
            rev: doc.rev,
            ..CouchLeaseDocument::vacant(doc.id)
        };
        match self.put_document(&vacant.id, &vacant).await? {
            WriteOutcome::Written { .. } => Ok(()),
            WriteOutcome::RevisionConflict => Err(expired()),
        }
    }

    async fn ping(&self) -> CouchResult<()> {
        let url = self.config.database_url();
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: url,
                status: response.status(),
            })
        }
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

impl TableStore for CouchStore {
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
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}

impl LeaseStore for CouchStore {
    fn ensure_object(&self, key: &str) -> BoxFuture<'static, LeaseResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.ensure_lease_document(&key).await })
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
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
