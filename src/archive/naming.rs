use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Object key for a run started at `started_at`:
/// `{prefix}/{YYYY}/{MM}/{DD}/{stem}{YYYYMMDDTHHMMSSZ}-{run}.ndjson`,
/// where `run` is the first 8 hex digits of the run id.
pub fn object_key(prefix: &str, stem: &str, started_at: DateTime<Utc>, run_id: Uuid) -> String {
    let run = &run_id.simple().to_string()[..8];
    let name = format!(
        "{}/{stem}{}-{run}.ndjson",
        started_at.format("%Y/%m/%d"),
        started_at.format("%Y%m%dT%H%M%SZ"),
    );

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}
