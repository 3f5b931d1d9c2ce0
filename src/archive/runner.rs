//! One end-to-end archive run: estimate, export into the archive object,
//! then delete what was archived.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    cutoff::{compute_cutoff, count_eligible},
    deleter::BatchedDeleter,
    error::{ArchiveError, ArchiveResult},
    exporter::Exporter,
    manifest::{Manifest, find_stale},
    naming::object_key,
    writer::ArchiveWriter,
};
use crate::{
    config::ArchiveConfig, db::ArchiveSource, observability::metrics, storage::ArchiveStore,
};

/// Cutoff and eligible row count at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub cutoff: DateTime<Utc>,
    pub eligible: u64,
}

/// Results from a run that archived rows.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub cutoff: DateTime<Utc>,
    /// Rows counted before the export started.
    pub eligible: u64,
    /// Rows written to the archive object.
    pub exported: u64,
    /// Rows removed from the source table.
    pub deleted: u64,
    /// Page queries issued by the exporter.
    pub pages: u64,
    pub object_key: String,
    pub object_url: String,
    /// Size of the archive object.
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// No row was older than the cutoff. Nothing was written or deleted.
    NothingToArchive { cutoff: DateTime<Utc> },
    /// Counted only, because the run was configured as a dry run.
    DryRun(Estimate),
    Archived(RunReport),
}

impl RunOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::NothingToArchive { .. } => "nothing_to_archive",
            RunOutcome::DryRun(_) => "dry_run",
            RunOutcome::Archived(_) => "archived",
        }
    }
}

/// Runs archive passes over one table into one store.
pub struct Archiver {
    source: Arc<dyn ArchiveSource>,
    store: Arc<dyn ArchiveStore>,
    config: ArchiveConfig,
}

impl Archiver {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        store: Arc<dyn ArchiveStore>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Cutoff and eligible row count as of `now`, without side effects.
    pub async fn estimate(&self, now: DateTime<Utc>) -> ArchiveResult<Estimate> {
        let cutoff = compute_cutoff(now, self.config.retention_days);
        let eligible = count_eligible(self.source.as_ref(), cutoff).await?;
        info!(
            table = %self.source.table().table_name(),
            %cutoff,
            eligible,
            retention_days = self.config.retention_days,
            "Counted rows eligible for archival"
        );
        Ok(Estimate { cutoff, eligible })
    }

    pub async fn run(&self) -> ArchiveResult<RunOutcome> {
        self.run_at(Utc::now()).await
    }

    /// Run once with `now` as the reference time for the cutoff and the
    /// object key.
    pub async fn run_at(&self, now: DateTime<Utc>) -> ArchiveResult<RunOutcome> {
        let start = Instant::now();
        let result = self.execute(now, start).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(outcome) => metrics::record_archive_run(outcome.label(), elapsed),
            Err(e) => {
                error!(error = %e, elapsed_secs = elapsed, "Archive run failed");
                metrics::record_archive_run("failed", elapsed);
            }
        }
        result
    }

    async fn execute(&self, now: DateTime<Utc>, start: Instant) -> ArchiveResult<RunOutcome> {
        let estimate = self.estimate(now).await?;
        if estimate.eligible == 0 {
            info!(cutoff = %estimate.cutoff, "Nothing to archive");
            return Ok(RunOutcome::NothingToArchive {
                cutoff: estimate.cutoff,
            });
        }
        if self.config.dry_run {
            info!(
                cutoff = %estimate.cutoff,
                eligible = estimate.eligible,
                "DRY RUN: Would archive and delete {} rows",
                estimate.eligible
            );
            return Ok(RunOutcome::DryRun(estimate));
        }

        let manifest_dir = self.config.manifest_dir();
        self.warn_stale_manifests(&manifest_dir).await;

        let run_id = Uuid::new_v4();
        let key = object_key(&self.config.key_prefix, &self.config.object_stem, now, run_id);
        info!(%run_id, key, eligible = estimate.eligible, "Starting archive run");

        let mut manifest = Manifest::create(&manifest_dir, run_id).await?;
        let result = self
            .archive_and_delete(&mut manifest, run_id, estimate, &key, start)
            .await;

        if let Err(e) = manifest.remove().await {
            warn!(error = %e, "Failed to remove manifest after run");
        }
        result.map(RunOutcome::Archived)
    }

    async fn archive_and_delete(
        &self,
        manifest: &mut Manifest,
        run_id: Uuid,
        estimate: Estimate,
        key: &str,
        start: Instant,
    ) -> ArchiveResult<RunReport> {
        let table = self.source.table().table_name();

        let mut exporter = Exporter::new(
            self.source.as_ref(),
            manifest,
            estimate.cutoff,
            self.config.export_batch_size,
        );
        let receipt = ArchiveWriter::new(self.store.as_ref(), self.config.upload_chunk_bytes())
            .write(key, &mut exporter)
            .await?;
        let stats = exporter.stats();
        metrics::record_rows_exported(&table, receipt.records);

        if receipt.records != estimate.eligible {
            warn!(
                eligible = estimate.eligible,
                exported = receipt.records,
                "Exported row count differs from the estimate; the table changed during the run"
            );
        }

        let deleted = match BatchedDeleter::new(self.source.as_ref(), self.config.delete_batch_size)
            .delete_manifest(manifest, key)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                if let ArchiveError::DeleteBatch { deleted, .. } = &e {
                    metrics::record_rows_deleted(&table, *deleted);
                }
                return Err(e);
            }
        };
        metrics::record_rows_deleted(&table, deleted);

        let report = RunReport {
            run_id,
            cutoff: estimate.cutoff,
            eligible: estimate.eligible,
            exported: receipt.records,
            deleted,
            pages: stats.pages,
            object_key: receipt.key,
            object_url: receipt.url,
            bytes: receipt.bytes,
            elapsed: start.elapsed(),
        };
        info!(
            %run_id,
            exported = report.exported,
            deleted = report.deleted,
            pages = report.pages,
            bytes = report.bytes,
            url = report.object_url,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Archive run complete"
        );
        Ok(report)
    }

    async fn warn_stale_manifests(&self, dir: &std::path::Path) {
        match find_stale(dir).await {
            Ok(stale) => {
                for path in stale {
                    warn!(
                        path = %path.display(),
                        "Found manifest from an interrupted run; its rows may already be \
                         archived and are still in the table"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to scan for stale manifests"),
        }
    }
}
