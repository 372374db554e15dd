use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

fn date_str(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%d").to_string()
}

/// Path of a finished recording, relative to the output directory.
/// e.g. "2026-02-18/20260218T093000000Z_20260218T093012000Z.thermal"
pub fn recording_path(start_ms: i64, end_ms: i64) -> PathBuf {
    PathBuf::from(date_str(start_ms)).join(format!(
        "{start}_{end}.thermal",
        start = fmt_ts(start_ms),
        end = fmt_ts(end_ms),
    ))
}

/// Name of the in-progress file, written in the output directory root.
pub fn in_progress_name(start_ms: i64) -> String {
    format!(".recording_{start}.tmp", start = fmt_ts(start_ms))
}
