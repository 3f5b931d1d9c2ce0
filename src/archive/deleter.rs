use tracing::{debug, error, info};

use super::{
    error::{ArchiveError, ArchiveResult},
    manifest::Manifest,
};
use crate::db::{ArchiveSource, KeyValue};

/// Deletes the rows listed in a manifest, one transaction per batch.
pub struct BatchedDeleter<'a> {
    source: &'a dyn ArchiveSource,
    batch_size: usize,
}

impl<'a> BatchedDeleter<'a> {
    pub fn new(source: &'a dyn ArchiveSource, batch_size: u32) -> Self {
        Self {
            source,
            batch_size: (batch_size as usize).max(1),
        }
    }

    /// Delete every key in `manifest`. `archive_key` names the completed
    /// archive object these rows were written to.
    ///
    /// Stops at the first failing batch. Batches before it stay committed
    /// and are reported in [`ArchiveError::DeleteBatch`].
    pub async fn delete_manifest(
        &self,
        manifest: &mut Manifest,
        archive_key: &str,
    ) -> ArchiveResult<u64> {
        let kind = self.source.table().key_kind();
        let mut reader = manifest.reader().await?;
        let mut deleted = 0u64;
        let mut batch = 0u64;

        loop {
            let entries = reader.next_batch(self.batch_size).await?;
            if entries.is_empty() {
                break;
            }
            batch += 1;

            let keys = entries
                .into_iter()
                .map(|entry| {
                    KeyValue::parse(kind, &entry)
                        .ok_or(ArchiveError::InvalidManifestEntry { value: entry })
                })
                .collect::<ArchiveResult<Vec<_>>>()?;

            match self.source.delete_keys(&keys).await {
                Ok(affected) => {
                    deleted += affected;
                    debug!(batch, keys = keys.len(), affected, deleted, "Deleted batch");
                }
                Err(source) => {
                    error!(
                        batch,
                        deleted,
                        archive_key,
                        error = %source,
                        "Delete batch failed and was rolled back; archive is complete, \
                         remaining rows must be cleaned up by a later run"
                    );
                    return Err(ArchiveError::DeleteBatch {
                        batch,
                        deleted,
                        key: archive_key.to_string(),
                        source,
                    });
                }
            }
        }

        info!(batches = batch, deleted, "Deleted archived rows");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::KeyKind,
        db::{DbError, DbResult, SourceRow, TableSpec},
    };

    /// Records delete batches; fails the batch with the given 1-based index.
    struct RecordingSource {
        table: TableSpec,
        batches: Mutex<Vec<Vec<KeyValue>>>,
        fail_batch: Option<usize>,
    }

    impl RecordingSource {
        fn new(fail_batch: Option<usize>) -> Self {
            Self {
                table: TableSpec::new("Orders", "Id", "OrderDate", KeyKind::Integer).unwrap(),
                batches: Mutex::new(Vec::new()),
                fail_batch,
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    #[async_trait]
    impl ArchiveSource for RecordingSource {
        fn table(&self) -> &TableSpec {
            &self.table
        }

        async fn count_before(&self, _cutoff: DateTime<Utc>) -> DbResult<u64> {
            unreachable!()
        }

        async fn fetch_page(
            &self,
            _cutoff: DateTime<Utc>,
            _after: Option<&KeyValue>,
            _limit: u32,
        ) -> DbResult<Vec<SourceRow>> {
            unreachable!()
        }

        async fn delete_keys(&self, keys: &[KeyValue]) -> DbResult<u64> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(keys.to_vec());
            if self.fail_batch == Some(batches.len()) {
                return Err(DbError::Internal("deadlock detected".into()));
            }
            Ok(keys.len() as u64)
        }
    }

    async fn manifest_with(dir: &TempDir, count: i64) -> Manifest {
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        manifest.append_page(1..=count).await.unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_full_and_partial_batches() {
        let dir = TempDir::new().unwrap();
        let mut manifest = manifest_with(&dir, 2500).await;
        let source = RecordingSource::new(None);

        let deleted = BatchedDeleter::new(&source, 1000)
            .delete_manifest(&mut manifest, "archive/x.ndjson")
            .await
            .unwrap();

        assert_eq!(deleted, 2500);
        assert_eq!(source.batch_sizes(), [1000, 1000, 500]);
    }

    #[tokio::test]
    async fn test_failure_reports_committed_rows() {
        let dir = TempDir::new().unwrap();
        let mut manifest = manifest_with(&dir, 2500).await;
        let source = RecordingSource::new(Some(2));

        let err = BatchedDeleter::new(&source, 1000)
            .delete_manifest(&mut manifest, "archive/x.ndjson")
            .await
            .unwrap_err();

        match err {
            ArchiveError::DeleteBatch {
                batch, deleted, key, ..
            } => {
                assert_eq!(batch, 2);
                assert_eq!(deleted, 1000);
                assert_eq!(key, "archive/x.ndjson");
            }
            other => panic!("expected DeleteBatch, got {other}"),
        }
        // Nothing after the failing batch is attempted.
        assert_eq!(source.batch_sizes(), [1000, 1000]);
    }

    #[tokio::test]
    async fn test_empty_manifest_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut manifest = manifest_with(&dir, 0).await;
        let source = RecordingSource::new(None);

        let deleted = BatchedDeleter::new(&source, 10)
            .delete_manifest(&mut manifest, "k")
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert!(source.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_stops_before_deleting() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), Uuid::new_v4()).await.unwrap();
        manifest.append_page(["1", "two", "3"]).await.unwrap();
        let source = RecordingSource::new(None);

        let err = BatchedDeleter::new(&source, 10)
            .delete_manifest(&mut manifest, "k")
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::InvalidManifestEntry { ref value } if value == "two"));
        assert!(source.batch_sizes().is_empty());
    }
}
