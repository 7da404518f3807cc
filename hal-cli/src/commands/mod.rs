pub mod logs;
pub mod pool;
pub mod run;
pub mod tasks;

use chrono::{DateTime, Utc};

/// Render a unix-millis timestamp for table output
pub fn format_ts(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
