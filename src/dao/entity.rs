//! Conversion between typed aggregates and flat [`TableRow`]s.
//!
//! Scalar fields are stored as plain JSON values. Fields listed in
//! [`TableEntity::STRUCTURED_FIELDS`] (lists, nested objects) are flattened to JSON
//! text under a column of the same name and parsed back on read.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::dao::{
    models::{TableRow, row_identity},
    storage::{StorageError, StorageResult},
};

/// Serialized name of the partition key property on every entity.
pub const PARTITION_KEY_FIELD: &str = "partitionKey";
/// Serialized name of the row key property on every entity.
pub const ROW_KEY_FIELD: &str = "rowKey";

/// An aggregate that can be persisted as a single table row.
///
/// Implementors serialize their keys as [`PARTITION_KEY_FIELD`] / [`ROW_KEY_FIELD`]
/// and expose a version counter bumped by the locked-entity flush.
pub trait TableEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the entity rows live in.
    const TABLE: &'static str;
    /// Serialized names of the fields stored as JSON text columns.
    const STRUCTURED_FIELDS: &'static [&'static str];

    /// Build a default entity addressed by the given (sanitized) keys.
    fn with_keys(partition_key: String, row_key: String) -> Self;
    /// Partition and row key of the entity.
    fn keys(&self) -> (&str, &str);
    /// Current version counter.
    fn version(&self) -> u64;
    /// Overwrite the version counter.
    fn set_version(&mut self, version: u64);
}

/// Flatten an entity into a row carrying the given etag.
pub fn encode<T: TableEntity>(entity: &T, etag: Option<String>) -> StorageResult<TableRow> {
    let (partition_key, row_key) = entity.keys();
    let codec_error = |source| StorageError::Codec {
        table: T::TABLE.to_owned(),
        key: row_identity(partition_key, row_key),
        source,
    };

    let mut properties = match serde_json::to_value(entity).map_err(codec_error)? {
        Value::Object(map) => map,
        other => {
            return Err(codec_error(<serde_json::Error as serde::ser::Error>::custom(format!(
                "entity serialized to {other} instead of an object"
            ))));
        }
    };

    properties.remove(PARTITION_KEY_FIELD);
    properties.remove(ROW_KEY_FIELD);

    for field in T::STRUCTURED_FIELDS {
        if let Some(value) = properties.get_mut(*field) {
            let text = serde_json::to_string(&*value).map_err(codec_error)?;
            *value = Value::String(text);
        }
    }

    Ok(TableRow {
        partition_key: partition_key.to_owned(),
        row_key: row_key.to_owned(),
        etag,
        properties,
    })
}

/// Rebuild an entity from a stored row.
pub fn decode<T: TableEntity>(row: TableRow) -> StorageResult<T> {
    let key = row.identity();
    let codec_error = |source| StorageError::Codec {
        table: T::TABLE.to_owned(),
        key: key.clone(),
        source,
    };

    let mut properties: Map<String, Value> = row.properties;
    for field in T::STRUCTURED_FIELDS {
        if let Some(Value::String(text)) = properties.get(*field) {
            let parsed: Value = serde_json::from_str(text).map_err(codec_error)?;
            properties.insert((*field).to_owned(), parsed);
        }
    }

    properties.insert(
        PARTITION_KEY_FIELD.to_owned(),
        Value::String(row.partition_key),
    );
    properties.insert(ROW_KEY_FIELD.to_owned(), Value::String(row.row_key));

    serde_json::from_value(Value::Object(properties)).map_err(codec_error)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        partition_key: String,
        row_key: String,
        #[serde(default)]
        version: u64,
        #[serde(default)]
        title: String,
        #[serde(default)]
        members: Vec<Member>,
        #[serde(default)]
        leader: Option<Member>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member {
        id: u32,
        tags: Vec<String>,
    }

    impl TableEntity for Sample {
        const TABLE: &'static str = "samples";
        const STRUCTURED_FIELDS: &'static [&'static str] = &["members", "leader"];

        fn with_keys(partition_key: String, row_key: String) -> Self {
            Self {
                partition_key,
                row_key,
                version: 0,
                title: String::new(),
                members: Vec::new(),
                leader: None,
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

    fn sample() -> Sample {
        let mut sample = Sample::with_keys("p".into(), "r".into());
        sample.title = "hello".into();
        sample.version = 3;
        sample.members = vec![Member {
            id: 1,
            tags: vec!["a".into(), "b".into()],
        }];
        sample
    }

    #[test]
    fn structured_fields_become_json_text() {
        let row = encode(&sample(), Some("etag-1".into())).unwrap();

        assert_eq!(row.partition_key, "p");
        assert_eq!(row.row_key, "r");
        assert_eq!(row.etag.as_deref(), Some("etag-1"));
        assert_eq!(row.properties["title"], json!("hello"));
        assert_eq!(row.properties["version"], json!(3));
        assert_eq!(
            row.properties["members"],
            json!(r#"[{"id":1,"tags":["a","b"]}]"#)
        );
        assert_eq!(row.properties["leader"], json!("null"));
        assert!(!row.properties.contains_key(PARTITION_KEY_FIELD));
        assert!(!row.properties.contains_key(ROW_KEY_FIELD));
    }

    #[test]
    fn decode_restores_the_entity() {
        let original = sample();
        let decoded: Sample = decode(encode(&original, None).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn missing_structured_columns_use_defaults() {
        let mut row = TableRow::new("p", "r");
        row.properties.insert("title".into(), json!("bare"));

        let decoded: Sample = decode(row).unwrap();
        assert_eq!(decoded.title, "bare");
        assert!(decoded.members.is_empty());
        assert_eq!(decoded.leader, None);
    }

    #[test]
    fn corrupt_structured_text_is_a_codec_error() {
        let mut row = TableRow::new("p", "r");
        row.properties.insert("members".into(), json!("[{not json"));

        let err = decode::<Sample>(row).unwrap_err();
        assert!(matches!(err, StorageError::Codec { ref table, .. } if table == "samples"));
    }
}
