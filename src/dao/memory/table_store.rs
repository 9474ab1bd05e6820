use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{ETag, TableRow, row_identity},
    storage::{StorageError, StorageResult},
    table_store::TableStore,
};

type RowKey = (String, String, String);

/// Table store backed by a concurrent map keyed by `(table, partition, row)`.
#[derive(Clone, Default)]
pub struct MemoryTableStore {
    rows: Arc<DashMap<RowKey, TableRow>>,
}

impl MemoryTableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, table: &str, mut row: TableRow, etag: ETag) -> StorageResult<TableRow> {
        let key = (
            table.to_owned(),
            row.partition_key.clone(),
            row.row_key.clone(),
        );
        let precondition_failed = || StorageError::PreconditionFailed {
            table: table.to_owned(),
            key: row_identity(&key.1, &key.2),
        };

        row.etag = Some(Uuid::new_v4().to_string());
        match self.rows.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if !etag.permits(slot.get().etag.as_deref()) {
                    return Err(precondition_failed());
                }
                slot.insert(row.clone());
            }
            Entry::Vacant(slot) => {
                if !etag.permits(None) {
                    return Err(precondition_failed());
                }
                slot.insert(row.clone());
            }
        }
        Ok(row)
    }
}

impl TableStore for MemoryTableStore {
    fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<TableRow>>> {
        let key = (
            table.to_owned(),
            partition_key.to_owned(),
            row_key.to_owned(),
        );
        let row = self.rows.get(&key).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(row) })
    }

    fn upsert(
        &self,
        table: &str,
        row: TableRow,
        etag: ETag,
    ) -> BoxFuture<'static, StorageResult<TableRow>> {
        let result = self.write(table, row, etag);
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
    use serde_json::json;

    use super::*;

    fn row(title: &str) -> TableRow {
        let mut row = TableRow::new("p", "r");
        row.properties.insert("title".into(), json!(title));
        row
    }

    #[tokio::test]
    async fn missing_row_reads_as_none() {
        let store = MemoryTableStore::new();
        assert!(store.get("games", "p", "r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wildcard_upsert_overwrites_and_assigns_etag() {
        let store = MemoryTableStore::new();
        let first = store.upsert("games", row("one"), ETag::Any).await.unwrap();
        let second = store.upsert("games", row("two"), ETag::Any).await.unwrap();

        assert!(first.etag.is_some());
        assert_ne!(first.etag, second.etag);

        let stored = store.get("games", "p", "r").await.unwrap().unwrap();
        assert_eq!(stored.properties["title"], json!("two"));
        assert_eq!(stored.etag, second.etag);
    }

    #[tokio::test]
    async fn stale_etag_is_rejected() {
        let store = MemoryTableStore::new();
        let first = store.upsert("games", row("one"), ETag::Any).await.unwrap();
        store.upsert("games", row("two"), ETag::Any).await.unwrap();

        let stale = ETag::Matches(first.etag.unwrap());
        let err = store.upsert("games", row("three"), stale).await.unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let store = MemoryTableStore::new();
        store.upsert("games", row("one"), ETag::Any).await.unwrap();
        assert!(store.get("other", "p", "r").await.unwrap().is_none());
    }
}
