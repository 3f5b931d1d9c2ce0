//! Keyset-paginated export of eligible rows as NDJSON records.

use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use super::{
    error::{ArchiveError, ArchiveResult},
    manifest::Manifest,
};
use crate::db::{ArchiveSource, KeyValue, SourceRow};

/// Counters for one export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Queries issued against the source.
    pub pages: u64,
    /// Records yielded.
    pub rows: u64,
}

/// Pulls eligible rows page by page, ascending by primary key, and hands
/// them out one serialized record at a time.
///
/// Each page asks for one row more than the batch size. The extra row only
/// tells whether another page exists and is fetched again as the first row
/// of that page, so N rows cost exactly ceil(N / batch) queries.
///
/// Keys of a page are appended to the manifest and synced before any record
/// of that page is returned.
pub struct Exporter<'a> {
    source: &'a dyn ArchiveSource,
    manifest: &'a mut Manifest,
    cutoff: DateTime<Utc>,
    batch_size: u32,
    last_key: Option<KeyValue>,
    pending: VecDeque<Bytes>,
    exhausted: bool,
    stats: ExportStats,
}

impl<'a> Exporter<'a> {
    pub fn new(
        source: &'a dyn ArchiveSource,
        manifest: &'a mut Manifest,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Self {
        Self {
            source,
            manifest,
            cutoff,
            batch_size: batch_size.max(1),
            last_key: None,
            pending: VecDeque::new(),
            exhausted: false,
            stats: ExportStats::default(),
        }
    }

    /// Next NDJSON record (one JSON object plus `\n`), or `None` when every
    /// eligible row has been returned.
    pub async fn next_record(&mut self) -> ArchiveResult<Option<Bytes>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                self.stats.rows += 1;
                return Ok(Some(record));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    pub fn stats(&self) -> ExportStats {
        self.stats
    }

    async fn fetch_page(&mut self) -> ArchiveResult<()> {
        let limit = self.batch_size.saturating_add(1);
        let mut rows = self
            .source
            .fetch_page(self.cutoff, self.last_key.as_ref(), limit)
            .await
            .map_err(|e| {
                error!(error = %e, after = ?self.last_key, "Failed to fetch page");
                ArchiveError::Export(e)
            })?;
        self.stats.pages += 1;

        if rows.len() > self.batch_size as usize {
            rows.truncate(self.batch_size as usize);
        } else {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(());
        }

        let table = self.source.table();
        let mut keys = Vec::with_capacity(rows.len());
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push(row.key(table).map_err(ArchiveError::Export)?);
            records.push(encode_record(row)?);
        }

        self.manifest.append_page(&keys).await?;

        debug!(
            page = self.stats.pages,
            rows = rows.len(),
            first = %keys[0],
            last = %keys[keys.len() - 1],
            "Exported page"
        );

        self.last_key = keys.pop();
        self.pending.extend(records);
        Ok(())
    }
}

fn encode_record(row: &SourceRow) -> ArchiveResult<Bytes> {
    let mut line = serde_json::to_vec(row)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::KeyKind,
        db::{DbError, DbResult, TableSpec},
    };

    /// Serves integer-keyed rows from memory and records each request.
    struct VecSource {
        table: TableSpec,
        ids: Vec<i64>,
        requests: Mutex<Vec<(Option<KeyValue>, u32)>>,
        fail_on_page: Option<usize>,
    }

    impl VecSource {
        fn new(ids: impl IntoIterator<Item = i64>) -> Self {
            Self {
                table: TableSpec::new("Orders", "Id", "OrderDate", KeyKind::Integer).unwrap(),
                ids: ids.into_iter().collect(),
                requests: Mutex::new(Vec::new()),
                fail_on_page: None,
            }
        }

        fn requests(&self) -> Vec<(Option<KeyValue>, u32)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArchiveSource for VecSource {
        fn table(&self) -> &TableSpec {
            &self.table
        }

        async fn count_before(&self, _cutoff: DateTime<Utc>) -> DbResult<u64> {
            Ok(self.ids.len() as u64)
        }

        async fn fetch_page(
            &self,
            _cutoff: DateTime<Utc>,
            after: Option<&KeyValue>,
            limit: u32,
        ) -> DbResult<Vec<SourceRow>> {
            let page = {
                let mut requests = self.requests.lock().unwrap();
                requests.push((after.cloned(), limit));
                requests.len()
            };
            if self.fail_on_page == Some(page) {
                return Err(DbError::Internal("connection reset".into()));
            }

            let after = match after {
                Some(KeyValue::Integer(id)) => *id,
                _ => i64::MIN,
            };
            Ok(self
                .ids
                .iter()
                .filter(|id| **id > after)
                .take(limit as usize)
                .map(|id| SourceRow::new(vec![("Id".into(), json!(id))]))
                .collect())
        }

        async fn delete_keys(&self, _keys: &[KeyValue]) -> DbResult<u64> {
            unreachable!("exporter never deletes")
        }
    }

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
    }

    async fn drain(exporter: &mut Exporter<'_>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(record) = exporter.next_record().await.unwrap() {
            out.push(String::from_utf8(record.to_vec()).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_partial_last_page() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        let source = VecSource::new(1..=7);

        let mut exporter = Exporter::new(&source, &mut manifest, cutoff(), 3);
        let records = drain(&mut exporter).await;

        assert_eq!(records.len(), 7);
        assert_eq!(records[0], "{\"Id\":1}\n");
        assert_eq!(records[6], "{\"Id\":7}\n");
        assert_eq!(exporter.stats(), ExportStats { pages: 3, rows: 7 });
        assert_eq!(
            source.requests(),
            [
                (None, 4),
                (Some(KeyValue::Integer(3)), 4),
                (Some(KeyValue::Integer(6)), 4),
            ]
        );
        assert_eq!(manifest.len(), 7);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_no_extra_query() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        let source = VecSource::new(1..=6);

        let mut exporter = Exporter::new(&source, &mut manifest, cutoff(), 3);
        assert_eq!(drain(&mut exporter).await.len(), 6);
        assert_eq!(exporter.stats().pages, 2);
    }

    #[tokio::test]
    async fn test_empty_source_ends_after_one_query() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        let source = VecSource::new([]);

        let mut exporter = Exporter::new(&source, &mut manifest, cutoff(), 3);
        assert!(exporter.next_record().await.unwrap().is_none());
        assert!(exporter.next_record().await.unwrap().is_none());
        assert_eq!(source.requests().len(), 1);
        assert!(manifest.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_durable_before_records_are_returned() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        let path = manifest.path().to_path_buf();
        let source = VecSource::new(1..=5);

        let mut exporter = Exporter::new(&source, &mut manifest, cutoff(), 2);
        exporter.next_record().await.unwrap().unwrap();

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, "1\n2\n");
    }

    #[tokio::test]
    async fn test_read_error_is_export_error() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        let mut source = VecSource::new(1..=5);
        source.fail_on_page = Some(2);

        let mut exporter = Exporter::new(&source, &mut manifest, cutoff(), 2);
        exporter.next_record().await.unwrap().unwrap();
        exporter.next_record().await.unwrap().unwrap();

        let err = exporter.next_record().await.unwrap_err();
        assert!(matches!(err, ArchiveError::Export(_)), "{err}");
    }
}
