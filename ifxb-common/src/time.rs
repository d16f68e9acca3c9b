//! Clock helpers

use chrono::{DateTime, Local, NaiveDate};

/// Get current local timestamp
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Today's date on the local clock
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Render a timestamp the way alerts and reports show it
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_format_timestamp() {
        let ts = Local.with_ymd_and_hms(2025, 9, 3, 7, 5, 9).unwrap();
        assert_eq!(format_timestamp(&ts), "2025-09-03 07:05:09");
    }
}
