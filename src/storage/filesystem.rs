use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info, instrument, warn};

use super::{ArchiveStore, ObjectUpload, StorageError, StorageResult, validate_key};
use crate::config::FilesystemStorageConfig;

/// Filesystem archive storage.
///
/// Objects are stored as `{path}/{key}`. Uploads are written to
/// `{key}.partial` and renamed into place on completion.
pub struct FilesystemArchiveStore {
    config: FilesystemStorageConfig,
}

impl FilesystemArchiveStore {
    pub fn new(config: FilesystemStorageConfig) -> Self {
        Self { config }
    }

    fn root(&self) -> &Path {
        Path::new(&self.config.path)
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root().to_path_buf(), |path, segment| path.join(segment))
    }

    async fn create_dirs(&self, dir: &Path) -> StorageResult<()> {
        tokio::fs::create_dir_all(dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(self.config.dir_mode))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for FilesystemArchiveStore {
    async fn ensure_container(&self) -> StorageResult<()> {
        let root = self.root();
        if tokio::fs::try_exists(root).await? {
            return Ok(());
        }
        if !self.config.create_dir {
            return Err(StorageError::Config(format!(
                "Archive directory {} does not exist and create_dir is disabled",
                root.display()
            )));
        }

        info!(path = %root.display(), "Creating archive storage directory");
        self.create_dirs(root).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn start_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn ObjectUpload>> {
        validate_key(key)?;

        let target = self.object_path(key);
        if tokio::fs::try_exists(&target).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        if let Some(parent) = target.parent()
            && !tokio::fs::try_exists(parent).await?
        {
            self.create_dirs(parent).await?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    StorageError::AlreadyExists(partial.display().to_string())
                }
                _ => StorageError::Io(e),
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &partial,
                std::fs::Permissions::from_mode(self.config.file_mode),
            )
            .await?;
        }

        debug!(path = %partial.display(), "Started filesystem upload");
        Ok(Box::new(FilesystemUpload {
            writer: Some(BufWriter::new(file)),
            partial,
            target,
        }))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(tokio::fs::try_exists(self.object_path(key)).await?)
    }

    fn url(&self, key: &str) -> String {
        format!("file://{}", self.object_path(key).display())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

struct FilesystemUpload {
    writer: Option<BufWriter<File>>,
    partial: PathBuf,
    target: PathBuf,
}

impl FilesystemUpload {
    fn writer(&mut self) -> StorageResult<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            StorageError::Io(std::io::Error::other("upload already finished"))
        })
    }
}

#[async_trait]
impl ObjectUpload for FilesystemUpload {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.writer()?.write_all(&chunk).await?;
        Ok(())
    }

    async fn complete(mut self: Box<Self>) -> StorageResult<()> {
        let mut writer = self.writer.take().ok_or_else(|| {
            StorageError::Io(std::io::Error::other("upload already finished"))
        })?;
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_all().await?;
        drop(file);

        if tokio::fs::try_exists(&self.target).await? {
            return Err(StorageError::AlreadyExists(
                self.target.display().to_string(),
            ));
        }
        tokio::fs::rename(&self.partial, &self.target).await?;

        info!(path = %self.target.display(), "Archive object stored");
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.writer.take());
        match tokio::fs::remove_file(&self.partial).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FilesystemUpload {
    fn drop(&mut self) {
        // Runs after complete() too; the partial file is gone by then.
        if let Err(e) = std::fs::remove_file(&self.partial)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.partial.display(), error = %e, "Failed to remove partial upload");
        }
    }
}
