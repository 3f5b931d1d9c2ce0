//! Background jobs.
//!
//! - **Archive worker**: runs the archiver on a fixed interval. Each run is
//!   awaited before the next sleep, so runs never overlap.
//!
//! ```toml
//! [archive]
//! interval_secs = 86400
//! ```

mod archive_worker;

pub use archive_worker::start_archive_worker;
