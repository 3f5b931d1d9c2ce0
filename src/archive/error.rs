use std::path::PathBuf;

use thiserror::Error;

use crate::{db::DbError, storage::StorageError};

/// Why a run failed. Every variant is fatal for the run; nothing is retried.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to count eligible rows: {0}")]
    Count(#[source] DbError),

    #[error("Failed to export rows: {0}")]
    Export(#[source] DbError),

    #[error("Failed to serialize row: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to upload archive object {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(
        "Delete batch {batch} failed after {deleted} rows were deleted; \
         archive object {key} is complete: {source}"
    )]
    DeleteBatch {
        /// 1-based index of the failing batch.
        batch: u64,
        /// Rows deleted by the batches committed before it.
        deleted: u64,
        key: String,
        #[source]
        source: DbError,
    },

    #[error("Manifest I/O error at {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest entry {value:?} is not a valid key")]
    InvalidManifestEntry { value: String },
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
