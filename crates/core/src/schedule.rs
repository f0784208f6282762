//! Cron normalization and next-occurrence math for job intervals.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::CoreError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month day-of-week`.
/// Job intervals use standard 5-field cron: `min hour day-of-month month day-of-week`.
pub fn normalize_cron(cron_5field: &str) -> String {
    let trimmed = cron_5field.trim();
    let field_count = trimmed.split_whitespace().count();
    if field_count == 5 {
        format!("0 {}", trimmed)
    } else {
        // Already 6-field or non-standard; pass through as-is.
        trimmed.to_string()
    }
}

/// Parse a job interval into a cron [`Schedule`].
pub fn parse_schedule(interval: &str) -> Result<Schedule, CoreError> {
    let normalized = normalize_cron(interval);
    Schedule::from_str(&normalized).map_err(|e| CoreError::InvalidCron {
        expression: interval.to_string(),
        reason: e.to_string(),
    })
}

/// Validate an interval. An empty interval is valid and means "one-shot".
pub fn validate_interval(interval: &str) -> Result<(), CoreError> {
    if interval.trim().is_empty() {
        return Ok(());
    }
    parse_schedule(interval).map(|_| ())
}

/// First occurrence of `interval` strictly after `after`.
///
/// Returns `Ok(None)` for an empty interval or a schedule with no future ticks.
pub fn next_occurrence(
    interval: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CoreError> {
    if interval.trim().is_empty() {
        return Ok(None);
    }
    let schedule = parse_schedule(interval)?;
    Ok(schedule.after(&after).next())
}
