//! Duration strings used by `retry.delay` and the `sleep` action.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{input}' is not a duration (expected forms like 500ms, 1s, 1.5s, 2m, 1h)")]
pub struct DurationError {
    pub input: String,
}

/// Parses `500ms`, `1s`, `1.5s`, `2m`, `1h`; a bare number means seconds and
/// an empty string means zero.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Duration::ZERO);
    }
    let invalid = || DurationError { input: raw.to_string() };

    let split_at = trimmed
        .find(|character: char| character.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    let seconds = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" => value,
        "ms" => value / 1_000.0,
        "m" => value * 60.0,
        "h" => value * 3_600.0,
        _ => return Err(invalid()),
    };
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}
