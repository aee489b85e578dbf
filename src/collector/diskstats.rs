// src/collector/diskstats.rs
//! In-flight I/O counts from /proc/diskstats.

use std::path::Path;
use tracing::debug;

/// Index of the "I/Os currently in progress" column.
const IN_FLIGHT_FIELD: usize = 11;

/// In-flight I/O count for the first namespace (`<controller>n1`) of a controller.
///
/// Format (kernel 4.18+):
/// ```text
/// major minor name rd_ios rd_merges rd_sectors rd_ticks wr_ios wr_merges wr_sectors wr_ticks in_flight io_ticks time_in_queue
/// ```
pub fn parse_in_flight(content: &str, controller: &str) -> Option<u64> {
    let namespace = format!("{controller}n1");
    content
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| fields.len() >= 14)
        .find(|fields| fields[2] == namespace)
        .and_then(|fields| fields[IN_FLIGHT_FIELD].parse().ok())
}

/// Read the stats file once per cycle. Unavailable stats are not an error.
pub async fn read_diskstats(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "diskstats unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "   8       0 sda 12345 6789 1000000 50000 5432 2100 500000 25000 0 30000 75000 0 0 0 0
 259       0 nvme0n1 50000 0 2000000 100000 30000 0 1500000 80000 2 120000 180000 0 0 0 0
 259       1 nvme0n1p1 400 0 9000 100 30 0 1500 80 1 120 180 0 0 0 0
 259       2 nvme1n1 10 0 20 1 3 0 15 8 0 12 18";

    #[test]
    fn finds_first_namespace() {
        assert_eq!(parse_in_flight(SAMPLE, "nvme0"), Some(2));
        assert_eq!(parse_in_flight(SAMPLE, "nvme1"), Some(0));
        assert_eq!(parse_in_flight(SAMPLE, "nvme7"), None);
    }

    #[test]
    fn short_lines_are_skipped() {
        assert_eq!(parse_in_flight("259 0 nvme0n1 1 2 3", "nvme0"), None);
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        assert!(read_diskstats(Path::new("/nonexistent/diskstats")).await.is_none());
    }
}
