use futures::future::BoxFuture;

use crate::dao::{
    models::{ETag, TableRow},
    storage::StorageResult,
};

/// Row store addressed by `(table, partition key, row key)`.
pub trait TableStore: Send + Sync {
    /// Fetch a row, `None` when it does not exist.
    fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<TableRow>>>;
    /// Insert or replace a row under the given etag condition, returning the stored row.
    fn upsert(&self, table: &str, row: TableRow, etag: ETag)
    -> BoxFuture<'static, StorageResult<TableRow>>;
    /// Verify the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
