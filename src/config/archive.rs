use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::db::is_valid_identifier;

/// Largest delete batch accepted. Keeps `IN (...)` lists under the bind
/// parameter limits of SQLite and PostgreSQL.
pub const MAX_DELETE_BATCH_SIZE: u32 = 30_000;

/// Archival policy.
///
/// ```toml
/// [archive]
/// retention_days = 30
/// export_batch_size = 1000
/// delete_batch_size = 1000
///
/// [archive.table]
/// name = "Orders"
/// primary_key = "Id"
/// date_column = "OrderDate"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Rows whose date column is older than this many days are archived.
    /// Zero archives everything dated before the start of the run.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Rows fetched per keyset page during export.
    #[serde(default = "default_batch_size")]
    pub export_batch_size: u32,

    /// Keys deleted per transaction.
    #[serde(default = "default_batch_size")]
    pub delete_batch_size: u32,

    /// Object key prefix. Date partitions are appended below it.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// File name stem of each archive object, followed by the timestamp.
    #[serde(default = "default_object_stem")]
    pub object_stem: String,

    /// Directory for the key manifest. Defaults to the system temp dir.
    #[serde(default)]
    pub manifest_dir: Option<PathBuf>,

    /// Records are coalesced into chunks of this many KiB before being
    /// handed to the storage backend.
    #[serde(default = "default_upload_chunk_kb")]
    pub upload_chunk_kb: u32,

    /// Count eligible rows and stop. Nothing is exported or deleted.
    #[serde(default)]
    pub dry_run: bool,

    /// Seconds between runs for `tessera schedule`.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Source table layout.
    #[serde(default)]
    pub table: TableConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            export_batch_size: default_batch_size(),
            delete_batch_size: default_batch_size(),
            key_prefix: default_key_prefix(),
            object_stem: default_object_stem(),
            manifest_dir: None,
            upload_chunk_kb: default_upload_chunk_kb(),
            dry_run: false,
            interval_secs: default_interval_secs(),
            table: TableConfig::default(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_batch_size == 0 {
            return Err(ConfigError::Validation(
                "archive.export_batch_size must be at least 1".into(),
            ));
        }
        if self.delete_batch_size == 0 || self.delete_batch_size > MAX_DELETE_BATCH_SIZE {
            return Err(ConfigError::Validation(format!(
                "archive.delete_batch_size must be between 1 and {MAX_DELETE_BATCH_SIZE}"
            )));
        }
        if self.upload_chunk_kb == 0 {
            return Err(ConfigError::Validation(
                "archive.upload_chunk_kb must be at least 1".into(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "archive.interval_secs must be at least 1".into(),
            ));
        }
        if self.object_stem.is_empty()
            || self
                .object_stem
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(ConfigError::Validation(format!(
                "archive.object_stem '{}' must be a non-empty file name",
                self.object_stem
            )));
        }
        if self.key_prefix.split('/').any(|segment| segment == "..") {
            return Err(ConfigError::Validation(format!(
                "archive.key_prefix '{}' cannot contain '..'",
                self.key_prefix
            )));
        }
        self.table.validate()
    }

    /// Directory the manifest file is created in.
    pub fn manifest_dir(&self) -> PathBuf {
        self.manifest_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Upload chunk size in bytes.
    pub fn upload_chunk_bytes(&self) -> usize {
        self.upload_chunk_kb as usize * 1024
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_batch_size() -> u32 {
    1000
}

fn default_key_prefix() -> String {
    "archive/orders".to_string()
}

fn default_object_stem() -> String {
    "orders".to_string()
}

fn default_upload_chunk_kb() -> u32 {
    256
}

fn default_interval_secs() -> u64 {
    86_400 // daily
}

/// Layout of the table being archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Table name, optionally schema-qualified (`sales.Orders`).
    #[serde(default = "default_table_name")]
    pub name: String,

    /// Unique, sortable column used for keyset pagination and deletes.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// How primary key values are bound in queries.
    #[serde(default)]
    pub primary_key_kind: KeyKind,

    /// Timestamp column compared against the cutoff.
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: default_table_name(),
            primary_key: default_primary_key(),
            primary_key_kind: KeyKind::default(),
            date_column: default_date_column(),
        }
    }
}

impl TableConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let qualified_ok = self.name.split('.').count() <= 2
            && self.name.split('.').all(is_valid_identifier);
        if !qualified_ok {
            return Err(ConfigError::Validation(format!(
                "archive.table.name '{}' is not a valid table name",
                self.name
            )));
        }
        for (field, value) in [
            ("primary_key", &self.primary_key),
            ("date_column", &self.date_column),
        ] {
            if !is_valid_identifier(value) {
                return Err(ConfigError::Validation(format!(
                    "archive.table.{field} '{value}' is not a valid column name"
                )));
            }
        }
        if self.primary_key == self.date_column {
            return Err(ConfigError::Validation(
                "archive.table.primary_key and date_column must differ".into(),
            ));
        }
        Ok(())
    }
}

fn default_table_name() -> String {
    "Orders".to_string()
}

fn default_primary_key() -> String {
    "Id".to_string()
}

fn default_date_column() -> String {
    "OrderDate".to_string()
}

/// Type of the primary key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// 64-bit integer keys.
    #[default]
    Integer,
    /// String keys, compared with the column's collation.
    Text,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ArchiveConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case("Orders", true)]
    #[case("sales.Orders", true)]
    #[case("_archive_2024", true)]
    #[case("a.b.c", false)]
    #[case("Orders; DROP TABLE x", false)]
    #[case("\"Orders\"", false)]
    #[case("2024_orders", false)]
    #[case("", false)]
    fn test_table_name_validation(#[case] name: &str, #[case] ok: bool) {
        let table = TableConfig {
            name: name.to_string(),
            ..TableConfig::default()
        };
        assert_eq!(table.validate().is_ok(), ok, "{name}");
    }

    #[test]
    fn test_same_key_and_date_column_rejected() {
        let table = TableConfig {
            date_column: "Id".into(),
            ..TableConfig::default()
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_delete_batch_upper_bound() {
        let config = ArchiveConfig {
            delete_batch_size: MAX_DELETE_BATCH_SIZE + 1,
            ..ArchiveConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delete_batch_size"), "{err}");
    }

    #[test]
    fn test_object_stem_cannot_contain_separator() {
        let config = ArchiveConfig {
            object_stem: "orders/2024".into(),
            ..ArchiveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_kind_parses() {
        let table: TableConfig = toml::from_str(r#"primary_key_kind = "text""#).unwrap();
        assert_eq!(table.primary_key_kind, KeyKind::Text);
        assert_eq!(table.name, "Orders");
    }

    #[test]
    fn test_manifest_dir_defaults_to_temp() {
        assert_eq!(ArchiveConfig::default().manifest_dir(), std::env::temp_dir());
    }
}
