use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat row as stored by a [`TableStore`](crate::dao::table_store::TableStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Partition the row lives in (already sanitized).
    pub partition_key: String,
    /// Row identifier inside the partition (already sanitized).
    pub row_key: String,
    /// Concurrency token assigned by the store on the last write.
    #[serde(default)]
    pub etag: Option<String>,
    /// Column values. Structured fields hold JSON text, everything else native JSON.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl TableRow {
    /// Create an empty row for the given keys.
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            etag: None,
            properties: Map::new(),
        }
    }

    /// Human readable `partition/row` identity used in errors and logs.
    pub fn identity(&self) -> String {
        row_identity(&self.partition_key, &self.row_key)
    }
}

/// Write condition attached to an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETag {
    /// Overwrite whatever is stored (the `*` wildcard).
    Any,
    /// Only write when the stored etag still equals this value.
    Matches(String),
}

impl ETag {
    /// Check a stored etag against this condition.
    pub fn permits(&self, stored: Option<&str>) -> bool {
        match self {
            ETag::Any => true,
            ETag::Matches(expected) => stored == Some(expected.as_str()),
        }
    }
}

/// Human-readable `pk/rk` identity used in logs and errors.
pub fn row_identity(partition_key: &str, row_key: &str) -> String {
    format!("{partition_key}/{row_key}")
}
