//! Cron expression handling.
//! Accepts standard 5-field "MIN HOUR DOM MON DOW" as well as the 6/7-field
//! (seconds, optional year) format of the `cron` crate, which does the parsing.
//!
//! Standard cron numbers weekdays 0-7 with 0 and 7 both Sunday; the `cron`
//! crate uses 1-7 with 1 = Sunday. 5-field expressions are shifted to match.
//! 6/7-field expressions are taken in the crate's own numbering.

use chrono::{DateTime, Utc};
use std::str::FromStr;

pub use ::cron::Schedule as CronSchedule;

/// Convert a 5- or 6-field expression to the 7-field form the `cron` crate expects.
pub fn normalize_cron_expression(expression: &str) -> String {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => format!(
            "0 {} {} {} {} {} *",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            standard_weekdays(fields[4])
        ),
        6 => format!("{expression} *"),
        _ => expression.to_string(),
    }
}

/// Rewrite a standard day-of-week field into the `cron` crate's numbering.
/// Names, `*` and `?` pass through; anything unparsable is left for the
/// parser to reject.
fn standard_weekdays(field: &str) -> String {
    field.split(',').map(standard_weekday_item).collect::<Vec<_>>().join(",")
}

fn standard_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let shifted = match range.split_once('-') {
        Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
            // A range ending on Sunday-as-7 wraps to the crate's Sunday (1).
            (Ok(start), Ok(7)) if step.is_none() && (1..7).contains(&start) => {
                format!("{}-7,1", start + 1)
            }
            (Ok(start), Ok(end)) => {
                let end = if end >= 7 { end } else { end + 1 };
                format!("{}-{end}", start.saturating_add(1))
            }
            _ => range.to_string(),
        },
        None => match range.parse::<u32>() {
            Ok(7) => "1".to_string(),
            Ok(day) => day.saturating_add(1).to_string(),
            Err(_) => range.to_string(),
        },
    };
    match step {
        Some(step) => format!("{shifted}/{step}"),
        None => shifted,
    }
}

/// Parse a cron expression. The error carries the parser's reason.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, String> {
    let normalized = normalize_cron_expression(expression);
    CronSchedule::from_str(&normalized).map_err(|e| e.to_string())
}

/// Next fire time strictly after `after`.
pub fn next_run_from_cron(schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}
