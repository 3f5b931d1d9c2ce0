mod archive_source;
mod table;

pub use archive_source::*;
pub use table::*;
