//! Tessera moves aged rows of a SQL table into NDJSON archive objects and
//! deletes them from the table once the archive is safely stored.

pub mod archive;
pub mod config;
pub mod db;
pub mod jobs;
pub mod observability;
pub mod storage;

#[cfg(test)]
mod tests;
