//! Archival pipeline.
//!
//! A run moves every row dated before the cutoff into one NDJSON object and
//! then deletes those rows:
//!
//! 1. [`cutoff`] computes the cutoff and counts eligible rows
//! 2. [`Exporter`] pages through them by primary key, recording each key in
//!    the run's [`Manifest`]
//! 3. [`ArchiveWriter`] streams the records into the archive store
//! 4. [`BatchedDeleter`] deletes the manifest's keys in transactional batches
//!
//! Deletion only starts once the upload has completed.

pub mod cutoff;
mod deleter;
mod error;
mod exporter;
pub mod manifest;
mod naming;
mod runner;
mod writer;

pub use deleter::BatchedDeleter;
pub use error::{ArchiveError, ArchiveResult};
pub use exporter::{ExportStats, Exporter};
pub use manifest::Manifest;
pub use naming::object_key;
pub use runner::{Archiver, Estimate, RunOutcome, RunReport};
pub use writer::{ArchiveWriter, UploadReceipt};
