use chrono::{Local, TimeZone};

/// Local wall-clock time `YYYY-MM-DD HH:MM:SS` for an epoch-millisecond instant
pub fn nice_timestamp(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("@{}", timestamp_ms),
    }
}

/// `"{h}h {m}m {s}s"`, negative durations keep their sign
pub fn elapsed_to_string(elapsed_ms: i64) -> String {
    let sign = if elapsed_ms < 0 { "-" } else { "" };
    let total_secs = (elapsed_ms.unsigned_abs() as f64 / 1000.0).round() as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("{}{}h {}m {}s", sign, hours, minutes, seconds)
}
