use chrono::{DateTime, Duration, Utc};

/// Formats the time left on a countdown the way the widgets display it,
/// minutes unpadded and seconds always two digits.
pub fn format_clock(remaining: Duration) -> String {
    let remaining = remaining.max(Duration::zero());
    let minutes = remaining.num_minutes();
    let seconds = remaining.num_seconds() % 60;
    format!("{}:{:02}", minutes, seconds)
}

/// Timestamps cross the wire and land in the statistics export as ISO-8601
/// with millisecond precision, independent of locale.
pub fn format_timestamp(moment: DateTime<Utc>) -> String {
    moment.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
