//! Durable list of the primary keys a run has exported.
//!
//! The exporter appends each page of keys and syncs the file before any
//! record of that page reaches the upload. The deleter later streams the
//! keys back in batches. The file is removed when the run ends, whatever the
//! outcome; one that survives a crash is reported by [`find_stale`].

use std::{
    fmt::{Display, Write as _},
    path::{Path, PathBuf},
};

use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{ArchiveError, ArchiveResult};

/// File name prefix of manifests.
pub const MANIFEST_PREFIX: &str = "archived_ids_";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Manifest {
        path: path.to_path_buf(),
        source,
    }
}

/// Handle to a run's manifest file.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    entries: u64,
    removed: bool,
}

impl Manifest {
    /// Create an empty manifest `archived_ids_{run_id}.txt` in `dir`.
    pub async fn create(dir: &Path, run_id: Uuid) -> ArchiveResult<Self> {
        tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;

        let path = dir.join(format!("{MANIFEST_PREFIX}{run_id}.txt"));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;

        debug!(path = %path.display(), "Created manifest");
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            entries: 0,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of keys appended so far.
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append one page of keys and make them durable before returning.
    pub async fn append_page<I, K>(&mut self, keys: I) -> ArchiveResult<()>
    where
        I: IntoIterator<Item = K>,
        K: Display,
    {
        let mut buf = String::new();
        let mut count = 0u64;
        for key in keys {
            let _ = writeln!(buf, "{key}");
            count += 1;
        }

        let writer = self.writer.as_mut().ok_or_else(|| ArchiveError::Manifest {
            path: self.path.clone(),
            source: std::io::Error::other("manifest is closed for writing"),
        })?;
        writer
            .write_all(buf.as_bytes())
            .await
            .map_err(io_error(&self.path))?;
        writer.flush().await.map_err(io_error(&self.path))?;
        writer
            .get_ref()
            .sync_data()
            .await
            .map_err(io_error(&self.path))?;

        self.entries += count;
        Ok(())
    }

    /// Close the manifest for writing and stream its keys from the start.
    pub async fn reader(&mut self) -> ArchiveResult<ManifestReader> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await.map_err(io_error(&self.path))?;
            writer
                .get_ref()
                .sync_all()
                .await
                .map_err(io_error(&self.path))?;
        }

        let file = File::open(&self.path).await.map_err(io_error(&self.path))?;
        Ok(ManifestReader {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
        })
    }

    /// Delete the manifest file.
    pub async fn remove(mut self) -> ArchiveResult<()> {
        drop(self.writer.take());
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed manifest");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path)(e)),
        }
    }
}

impl Drop for Manifest {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove manifest");
        }
    }
}

/// Sequential reader over a manifest's keys.
pub struct ManifestReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
}

impl ManifestReader {
    /// Up to `max` keys. Empty once the manifest is exhausted.
    pub async fn next_batch(&mut self, max: usize) -> ArchiveResult<Vec<String>> {
        let mut batch = Vec::with_capacity(max.min(4096));
        while batch.len() < max {
            match self.lines.next_line().await.map_err(io_error(&self.path))? {
                Some(line) => batch.push(line),
                None => break,
            }
        }
        Ok(batch)
    }
}

/// Manifests left in `dir` by runs that never finished.
pub async fn find_stale(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut stale = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stale),
        Err(e) => return Err(io_error(dir)(e)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(MANIFEST_PREFIX) && name.ends_with(".txt") {
            stale.push(entry.path());
        }
    }
    stale.sort();
    Ok(stale)
}
