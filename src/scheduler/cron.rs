//! Cron expression handling
//!
//! Accepts the classic five-field form (`minute hour day month weekday`,
//! weekday 0-7 with Sunday as 0 or 7) as well as the seconds-first six and
//! seven field forms understood by the `cron` crate.
//!
//! Fields are matched against UTC wall-clock time, never the host's local
//! zone: `0 2 * * *` fires at 02:00 UTC wherever the process runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// A parsed cron schedule, evaluated in UTC
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!(
                "0 {} {} {} {} {}",
                fields[0],
                fields[1],
                fields[2],
                fields[3],
                weekday_field(fields[4])
            ),
            6 | 7 => fields.join(" "),
            n => {
                return Err(ScheduleError::Invalid {
                    expr: expr.to_string(),
                    message: format!("expected 5, 6 or 7 fields, found {}", n),
                })
            }
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| ScheduleError::Invalid {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
        })
    }

    /// The first occurrence strictly after `after`, in UTC
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).find(|t| *t > after)
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Shift numeric weekdays from 0-7 (Sunday = 0 or 7) to 1-7 (Sunday = 1).
/// Step values after `/` are left alone.
fn weekday_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut digits = String::new();
    let mut after_slash = false;

    for c in field.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        push_weekday(&mut out, &mut digits, after_slash);
        after_slash = c == '/';
        out.push(c);
    }
    push_weekday(&mut out, &mut digits, after_slash);
    out
}

fn push_weekday(out: &mut String, digits: &mut String, after_slash: bool) {
    if digits.is_empty() {
        return;
    }
    match digits.parse::<u32>() {
        Ok(n) if !after_slash && n <= 7 => {
            let shifted = if n == 0 || n == 7 { 1 } else { n + 1 };
            out.push_str(&shifted.to_string());
        }
        _ => out.push_str(digits),
    }
    digits.clear();
}

/// Schedule errors
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {message}")]
    Invalid { expr: String, message: String },

    #[error("Cron expression '{0}' has no upcoming occurrence")]
    Exhausted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, s).unwrap()
    }

    #[test]
    fn test_five_field_every_six_hours() {
        let schedule = CronSchedule::parse("0 */6 * * *").unwrap();

        assert_eq!(schedule.next_after(at(1, 30, 0)), Some(at(6, 0, 0)));
        // Strictly after: a boundary maps to the following boundary
        assert_eq!(schedule.next_after(at(6, 0, 0)), Some(at(12, 0, 0)));
    }

    #[test]
    fn test_six_field_passthrough() {
        let schedule = CronSchedule::parse("*/10 * * * * *").unwrap();
        assert_eq!(schedule.next_after(at(1, 0, 5)), Some(at(1, 0, 10)));
    }

    #[test]
    fn test_weekday_mapping() {
        // 2024-03-05 is a Tuesday; weekday 1 is Monday in classic cron
        let schedule = CronSchedule::parse("0 9 * * 1").unwrap();
        let next = schedule.next_after(at(12, 0, 0)).unwrap();

        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 9);

        let sunday = CronSchedule::parse("0 0 * * 0").unwrap();
        assert_eq!(sunday.next_after(at(0, 0, 0)).unwrap().weekday(), Weekday::Sun);
    }

    #[test]
    fn test_weekday_field_rewrite() {
        assert_eq!(weekday_field("*"), "*");
        assert_eq!(weekday_field("1-5"), "2-6");
        assert_eq!(weekday_field("0,6"), "1,7");
        assert_eq!(weekday_field("*/2"), "*/2");
        assert_eq!(weekday_field("MON-FRI"), "MON-FRI");
    }

    #[test]
    fn test_fields_match_utc_time() {
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(schedule.next_after(at(0, 0, 0)), Some(at(2, 0, 0)));

        // 01:00 at UTC+8 is 17:00 UTC the previous day
        let local = chrono::FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 1, 0, 0)
            .unwrap();
        let next = schedule.next_after(local.with_timezone(&Utc)).unwrap();
        assert_eq!(next, at(2, 0, 0));
        assert_eq!(next.with_timezone(&local.timezone()).hour(), 10);
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSchedule::parse("").is_err());
        assert!(CronSchedule::parse("* * *").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("not a cron at all").is_err());
    }
}
