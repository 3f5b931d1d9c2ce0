use chrono::{DateTime, Duration, Utc};
use tracing::error;

use super::error::{ArchiveError, ArchiveResult};
use crate::db::ArchiveSource;

/// Rows dated strictly before the returned instant are eligible.
pub fn compute_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(retention_days))
}

/// Number of rows eligible for archival at `cutoff`.
pub async fn count_eligible(source: &dyn ArchiveSource, cutoff: DateTime<Utc>) -> ArchiveResult<u64> {
    source.count_before(cutoff).await.map_err(|e| {
        error!(error = %e, table = %source.table().table_name(), "Failed to count eligible rows");
        ArchiveError::Count(e)
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_thirty_day_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            compute_cutoff(now, 30),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_zero_days_is_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 34, 56).unwrap();
        assert_eq!(compute_cutoff(now, 0), now);
    }
}
