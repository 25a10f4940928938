//! Timestamp formatting for journal entries.

use chrono::{DateTime, Local};

const HUMAN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a local timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn human(ts: &DateTime<Local>) -> String {
    ts.format(HUMAN_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn human_drops_subseconds_and_offset() {
        let ts = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().unwrap();
        assert_eq!(human(&ts), "2024-03-09 07:05:01");
    }
}
