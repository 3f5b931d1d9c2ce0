//! Archive worker for running the archiver periodically.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::archive::{Archiver, RunOutcome};

/// Starts the archive worker loop.
///
/// Runs immediately, then once every `interval_secs` after the previous run
/// finished. A failed run is logged and the worker keeps going; it never
/// retries within the same interval.
///
/// Returns once `shutdown` turns true. A run in progress is finished first.
pub async fn start_archive_worker(archiver: Arc<Archiver>, mut shutdown: watch::Receiver<bool>) {
    let config = archiver.config();
    let interval = Duration::from_secs(config.interval_secs.max(1));
    let dry_run_msg = if config.dry_run { " (DRY RUN)" } else { "" };

    tracing::info!(
        interval_secs = config.interval_secs,
        retention_days = config.retention_days,
        export_batch_size = config.export_batch_size,
        delete_batch_size = config.delete_batch_size,
        dry_run = config.dry_run,
        "Starting archive worker{}",
        dry_run_msg
    );

    while !*shutdown.borrow() {
        match archiver.run().await {
            Ok(RunOutcome::Archived(report)) => {
                tracing::info!(
                    run_id = %report.run_id,
                    exported = report.exported,
                    deleted = report.deleted,
                    object = report.object_key,
                    "Scheduled archive run complete"
                );
            }
            Ok(outcome) => {
                tracing::debug!(outcome = outcome.label(), "Scheduled archive run complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running scheduled archive");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("Archive worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        config::{ArchiveConfig, KeyKind},
        db::{ArchiveSource, DbResult, KeyValue, SourceRow, TableSpec},
        storage::memory::MemoryArchiveStore,
    };

    /// Empty table that counts how often a run estimated it.
    struct EmptySource {
        table: TableSpec,
        counts: AtomicUsize,
        counted: Notify,
    }

    #[async_trait]
    impl ArchiveSource for EmptySource {
        fn table(&self) -> &TableSpec {
            &self.table
        }

        async fn count_before(&self, _cutoff: DateTime<Utc>) -> DbResult<u64> {
            self.counts.fetch_add(1, Ordering::SeqCst);
            self.counted.notify_one();
            Ok(0)
        }

        async fn fetch_page(
            &self,
            _cutoff: DateTime<Utc>,
            _after: Option<&KeyValue>,
            _limit: u32,
        ) -> DbResult<Vec<SourceRow>> {
            Ok(Vec::new())
        }

        async fn delete_keys(&self, _keys: &[KeyValue]) -> DbResult<u64> {
            Ok(0)
        }
    }

    fn setup() -> (Arc<EmptySource>, Arc<Archiver>) {
        let source = Arc::new(EmptySource {
            table: TableSpec::new("Orders", "Id", "OrderDate", KeyKind::Integer).unwrap(),
            counts: AtomicUsize::new(0),
            counted: Notify::new(),
        });
        let config = ArchiveConfig {
            interval_secs: 3600,
            ..Default::default()
        };
        let archiver = Archiver::new(
            source.clone(),
            Arc::new(MemoryArchiveStore::new()),
            config,
        );
        (source, Arc::new(archiver))
    }

    #[tokio::test]
    async fn test_runs_immediately_then_stops_on_shutdown() {
        let (source, archiver) = setup();
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(start_archive_worker(archiver, rx));

        tokio::time::timeout(Duration::from_secs(5), source.counted.notified())
            .await
            .expect("worker did not run");
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert_eq!(source.counts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() {
        let (source, archiver) = setup();
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(start_archive_worker(archiver, rx));

        tokio::time::timeout(Duration::from_secs(5), source.counted.notified())
            .await
            .expect("worker did not run");
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert_eq!(source.counts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_does_not_run_when_already_shut_down() {
        let (source, archiver) = setup();
        let (_tx, rx) = watch::channel(true);

        start_archive_worker(archiver, rx).await;

        assert_eq!(source.counts.load(Ordering::SeqCst), 0);
    }
}
