//! Human-readable rendering of raw byte counts and durations.
//!
//! Both formatters accept the raw string values found in prober output as
//! well as already-parsed numbers. Anything that does not parse renders as
//! [`NOT_AVAILABLE`].

/// Placeholder for a value that is unknown or could not be parsed.
pub const NOT_AVAILABLE: &str = "N/A";

const SIZE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Format a byte count scaled by powers of 1024, e.g. `1.5 KB`.
///
/// The scaled value is rounded to two decimal places and always printed with
/// at least one fractional digit (`512.0 B`, `1.23 MB`). Zero is `0 B`.
pub fn format_size(bytes: impl Into<Option<u64>>) -> String {
    let Some(bytes) = bytes.into() else {
        return NOT_AVAILABLE.to_string();
    };
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut unit = 0;
    let mut divisor: u128 = 1;
    while unit + 1 < SIZE_UNITS.len() && u128::from(bytes) >= divisor * 1024 {
        divisor *= 1024;
        unit += 1;
    }

    let scaled = round2(bytes as f64 / divisor as f64);
    format!("{} {}", render_decimal(scaled), SIZE_UNITS[unit])
}

/// Parse a numeric string (as emitted by ffprobe) and format it as a size.
pub fn format_size_str(raw: &str) -> String {
    match raw.trim().parse::<u64>() {
        Ok(bytes) => format_size(bytes),
        Err(_) => NOT_AVAILABLE.to_string(),
    }
}

/// Format seconds as `HH:MM:SS` when at least one hour, otherwise `MM:SS`.
///
/// Fractional seconds are truncated. Negative or non-finite input is `N/A`.
pub fn format_duration(seconds: impl Into<Option<f64>>) -> String {
    let Some(seconds) = seconds.into() else {
        return NOT_AVAILABLE.to_string();
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return NOT_AVAILABLE.to_string();
    }

    let total = seconds.trunc() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Parse a numeric string of seconds and format it as a duration.
pub fn format_duration_str(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(seconds) => format_duration(seconds),
        Err(_) => NOT_AVAILABLE.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn render_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
