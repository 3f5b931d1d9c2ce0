use bytes::BytesMut;
use tracing::{error, info, warn};

use super::{
    error::{ArchiveError, ArchiveResult},
    exporter::Exporter,
};
use crate::storage::{ArchiveStore, NDJSON_CONTENT_TYPE, ObjectUpload, StorageError};

/// Where and how much was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub url: String,
    pub records: u64,
    pub bytes: u64,
}

/// Streams an exporter's records into a single archive object.
///
/// Records are coalesced into chunks of `chunk_size` bytes. Any failure,
/// from the exporter or the store, aborts the upload so no partial object
/// is left under the key.
pub struct ArchiveWriter<'a> {
    store: &'a dyn ArchiveStore,
    chunk_size: usize,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(store: &'a dyn ArchiveStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn write(
        &self,
        key: &str,
        exporter: &mut Exporter<'_>,
    ) -> ArchiveResult<UploadReceipt> {
        let upload_error = |source: StorageError| ArchiveError::Upload {
            key: key.to_string(),
            source,
        };

        self.store.ensure_container().await.map_err(|e| {
            error!(error = %e, backend = self.store.backend_name(), "Failed to prepare archive container");
            upload_error(e)
        })?;

        let mut upload = self
            .store
            .start_upload(key, NDJSON_CONTENT_TYPE)
            .await
            .map_err(upload_error)?;
        info!(key, backend = self.store.backend_name(), "Archive upload started");

        let (records, bytes) = match self.pump(upload.as_mut(), key, exporter).await {
            Ok(totals) => totals,
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    warn!(key, error = %abort_err, "Failed to abort archive upload");
                }
                return Err(e);
            }
        };

        upload.complete().await.map_err(|e| {
            error!(key, error = %e, "Failed to complete archive upload");
            upload_error(e)
        })?;

        let url = self.store.url(key);
        info!(key, url, records, bytes, "Archive upload complete");
        Ok(UploadReceipt {
            key: key.to_string(),
            url,
            records,
            bytes,
        })
    }

    async fn pump(
        &self,
        upload: &mut dyn ObjectUpload,
        key: &str,
        exporter: &mut Exporter<'_>,
    ) -> ArchiveResult<(u64, u64)> {
        let mut chunk = BytesMut::with_capacity(self.chunk_size);
        let mut records = 0u64;
        let mut bytes = 0u64;

        while let Some(record) = exporter.next_record().await? {
            chunk.extend_from_slice(&record);
            records += 1;
            if chunk.len() >= self.chunk_size {
                bytes += chunk.len() as u64;
                self.send(upload, key, chunk.split().freeze()).await?;
            }
        }
        if !chunk.is_empty() {
            bytes += chunk.len() as u64;
            self.send(upload, key, chunk.freeze()).await?;
        }

        Ok((records, bytes))
    }

    async fn send(
        &self,
        upload: &mut dyn ObjectUpload,
        key: &str,
        chunk: bytes::Bytes,
    ) -> ArchiveResult<()> {
        upload.write(chunk).await.map_err(|source| {
            error!(key, error = %source, "Failed to write archive chunk");
            ArchiveError::Upload {
                key: key.to_string(),
                source,
            }
        })
    }
}
