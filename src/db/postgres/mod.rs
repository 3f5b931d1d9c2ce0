mod archive_source;
mod columns;

pub use archive_source::PostgresArchiveSource;
