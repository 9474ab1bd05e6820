use mongodb::bson::{Document, doc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dao::models::TableRow;

pub fn row_id(partition_key: &str, row_key: &str) -> String {
    format!("{partition_key}::{row_key}")
}

pub fn id_filter(id: &str) -> Document {
    doc! { "_id": id }
}

/// A table row as stored in the collection named after its table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRowDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub partition_key: String,
    pub row_key: String,
    pub etag: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl MongoRowDocument {
    pub fn from_row(row: TableRow, etag: String) -> Self {
        Self {
            id: row_id(&row.partition_key, &row.row_key),
            partition_key: row.partition_key,
            row_key: row.row_key,
            etag,
            properties: row.properties,
        }
    }
}

impl From<MongoRowDocument> for TableRow {
    fn from(value: MongoRowDocument) -> Self {
        Self {
            partition_key: value.partition_key,
            row_key: value.row_key,
            etag: Some(value.etag),
            properties: value.properties,
        }
    }
}

/// Lease placeholder keyed by the sanitized lock key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoLeaseDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at_ms: i64,
}

/// Matches the lease document when nobody holds a live lease at `now_ms`.
pub fn vacant_filter(key: &str, now_ms: i64) -> Document {
    doc! {
        "_id": key,
        "$or": [
            { "token": null },
            { "expires_at_ms": { "$lte": now_ms } },
        ],
    }
}

/// Matches the lease document while `token` still holds a live lease at `now_ms`.
pub fn holder_filter(key: &str, token: &str, now_ms: i64) -> Document {
    doc! {
        "_id": key,
        "token": token,
        "expires_at_ms": { "$gt": now_ms },
    }
}
