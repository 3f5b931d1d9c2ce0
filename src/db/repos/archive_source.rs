use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;

use super::TableSpec;
use crate::{
    config::KeyKind,
    db::error::{DbError, DbResult},
};

/// Read and delete access to the table being archived.
///
/// Reads run in autocommit mode. Each `delete_keys` call is one transaction.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Layout of the table this source reads.
    fn table(&self) -> &TableSpec;

    /// Number of rows whose date column is strictly before `cutoff`.
    async fn count_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;

    /// Up to `limit` rows with date before `cutoff` and primary key greater
    /// than `after` (all keys when `None`), ascending by primary key.
    async fn fetch_page(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&KeyValue>,
        limit: u32,
    ) -> DbResult<Vec<SourceRow>>;

    /// Delete the rows with the given keys in a single transaction.
    ///
    /// On error the transaction is rolled back and no row of this batch is
    /// deleted. Returns the number of rows actually deleted.
    async fn delete_keys(&self, keys: &[KeyValue]) -> DbResult<u64>;
}

/// A primary key value, typed by the configured [`KeyKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
}

impl KeyValue {
    /// Parse the textual form written to the manifest. Empty entries are
    /// never valid.
    pub fn parse(kind: KeyKind, s: &str) -> Option<Self> {
        match kind {
            KeyKind::Integer => s.parse().ok().map(KeyValue::Integer),
            KeyKind::Text if s.is_empty() => None,
            KeyKind::Text => Some(KeyValue::Text(s.to_string())),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Integer(v) => write!(f, "{v}"),
            KeyValue::Text(v) => f.write_str(v),
        }
    }
}

/// RFC 3339 form used for every timestamp written to an archive.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

/// One row read from the source table.
///
/// Columns keep the order the database returned them in, and serialize as
/// a flat JSON object in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: Vec<(String, Value)>,
}

impl SourceRow {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    /// Value of a column by name. Exact matches win over case-insensitive ones.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|(column, _)| column.eq_ignore_ascii_case(name))
            })
            .map(|(_, value)| value)
    }

    /// Primary key of this row, read from the named key column.
    pub fn key(&self, table: &TableSpec) -> DbResult<KeyValue> {
        let column = table.primary_key();
        let invalid = |reason: &str| DbError::InvalidKey {
            column: column.to_string(),
            reason: reason.to_string(),
        };

        let value = self
            .get(column)
            .ok_or_else(|| invalid("column not present in result set"))?;

        match (table.key_kind(), value) {
            (_, Value::Null) => Err(invalid("NULL key")),
            (KeyKind::Integer, Value::Number(n)) => n
                .as_i64()
                .map(KeyValue::Integer)
                .ok_or_else(|| invalid("not a 64-bit integer")),
            (KeyKind::Integer, _) => Err(invalid("expected an integer key")),
            (KeyKind::Text, Value::String(s)) => {
                if s.is_empty() {
                    Err(invalid("empty text key"))
                } else if s.contains(['\n', '\r']) {
                    Err(invalid("text key contains a line break"))
                } else {
                    Ok(KeyValue::Text(s.clone()))
                }
            }
            (KeyKind::Text, _) => Err(invalid("expected a text key")),
        }
    }
}

impl Serialize for SourceRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in &self.columns {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row() -> SourceRow {
        SourceRow::new(vec![
            ("Id".into(), json!(42)),
            ("Customer".into(), json!("ada")),
            ("OrderDate".into(), json!("2024-01-01T00:00:00Z")),
            ("Note".into(), Value::Null),
        ])
    }

    #[test]
    fn test_serializes_in_column_order() {
        let encoded = serde_json::to_string(&row()).unwrap();
        assert_eq!(
            encoded,
            r#"{"Id":42,"Customer":"ada","OrderDate":"2024-01-01T00:00:00Z","Note":null}"#
        );
    }

    #[test]
    fn test_key_reads_named_column() {
        let columns = vec![
            ("Customer".into(), json!("ada")),
            ("Id".into(), json!(7)),
        ];
        let spec = TableSpec::new("Orders", "Id", "OrderDate", KeyKind::Integer).unwrap();
        assert_eq!(
            SourceRow::new(columns).key(&spec).unwrap(),
            KeyValue::Integer(7)
        );
    }

    #[test]
    fn test_key_lookup_is_case_insensitive_fallback() {
        let spec = TableSpec::new("Orders", "id", "OrderDate", KeyKind::Integer).unwrap();
        assert_eq!(row().key(&spec).unwrap(), KeyValue::Integer(42));
    }

    #[test]
    fn test_key_kind_mismatch_is_error() {
        let spec = TableSpec::new("Orders", "Id", "OrderDate", KeyKind::Text).unwrap();
        assert!(matches!(row().key(&spec), Err(DbError::InvalidKey { .. })));

        let spec = TableSpec::new("Orders", "Note", "OrderDate", KeyKind::Integer).unwrap();
        assert!(matches!(row().key(&spec), Err(DbError::InvalidKey { .. })));
    }

    #[test]
    fn test_text_key_with_newline_rejected() {
        let spec = TableSpec::new("Orders", "Code", "OrderDate", KeyKind::Text).unwrap();
        let row = SourceRow::new(vec![("Code".into(), json!("a\nb"))]);
        assert!(row.key(&spec).is_err());
    }

    #[test]
    fn test_empty_text_key_rejected() {
        let spec = TableSpec::new("Orders", "Code", "OrderDate", KeyKind::Text).unwrap();
        let row = SourceRow::new(vec![("Code".into(), json!(""))]);
        assert!(matches!(
            row.key(&spec),
            Err(DbError::InvalidKey { ref reason, .. }) if reason == "empty text key"
        ));
        assert_eq!(KeyValue::parse(KeyKind::Text, ""), None);
    }

    #[test]
    fn test_key_parse_and_display_agree() {
        let key = KeyValue::parse(KeyKind::Integer, "-17").unwrap();
        assert_eq!(key, KeyValue::Integer(-17));
        assert_eq!(key.to_string(), "-17");

        assert_eq!(KeyValue::parse(KeyKind::Integer, "x1"), None);
        assert_eq!(
            KeyValue::parse(KeyKind::Text, "ORD-001"),
            Some(KeyValue::Text("ORD-001".into()))
        );
    }
}
