use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dao::models::TableRow;

pub const ROW_PREFIX: &str = "row::";
pub const LEASE_PREFIX: &str = "lease::";

pub fn row_doc_id(table: &str, partition_key: &str, row_key: &str) -> String {
    format!("{ROW_PREFIX}{table}::{partition_key}::{row_key}")
}

pub fn lease_doc_id(container: &str, key: &str) -> String {
    format!("{LEASE_PREFIX}{container}::{key}")
}

/// Body returned by CouchDB for a successful document write.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

/// A table row stored as one document. The CouchDB revision doubles as the row etag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRowDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub table: String,
    pub partition_key: String,
    pub row_key: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl CouchRowDocument {
    pub fn from_row(table: &str, row: TableRow, rev: Option<String>) -> Self {
        Self {
            id: row_doc_id(table, &row.partition_key, &row.row_key),
            rev,
            table: table.to_owned(),
            partition_key: row.partition_key,
            row_key: row.row_key,
            properties: row.properties,
        }
    }

    pub fn into_row(self) -> TableRow {
        TableRow {
            partition_key: self.partition_key,
            row_key: self.row_key,
            etag: self.rev,
            properties: self.properties,
        }
    }
}

/// Placeholder document carrying the current lease, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchLeaseDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at_ms: i64,
}

impl CouchLeaseDocument {
    pub fn vacant(id: String) -> Self {
        Self {
            id,
            rev: None,
            token: None,
            expires_at_ms: 0,
        }
    }

    /// Token of the live holder at `now_ms`, ignoring expired grants.
    pub fn live_token(&self, now_ms: i64) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|_| self.expires_at_ms > now_ms)
    }
}
