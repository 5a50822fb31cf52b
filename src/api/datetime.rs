//! Wall-clock conversions for the fixed civil timezone the organization
//! operates in (America/Chicago).
//!
//! Event dates are entered as `datetime-local` strings and stored verbatim;
//! scheduling comparisons need the matching UTC instant. `local_to_utc`
//! finds it by fixed-point iteration: start from the guess that the local
//! fields are UTC, observe what wall clock that instant maps to in Chicago,
//! and shift by the signed minute delta. Two iterations converge through
//! DST offset changes; inside a spring-forward gap the nonexistent local
//! time has no exact inverse and the result is whatever the final
//! iteration lands on.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::America::Chicago;
use chrono_tz::Tz;

const TZ: Tz = Chicago;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WallClock {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
}

impl WallClock {
    /// Monotone linearization of the calendar fields, only used to measure
    /// signed deltas between nearby wall-clock readings.
    fn ordinal_minutes(self) -> i64 {
        let months = i64::from(self.year) * 12 + i64::from(self.month);
        let days = months * 31 + i64::from(self.day);
        let hours = days * 24 + i64::from(self.hour);
        hours * 60 + i64::from(self.minute)
    }

    fn of_instant(instant: DateTime<Utc>) -> Self {
        let local = instant.with_timezone(&TZ);
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
        }
    }
}

fn parse_datetime_local(value: &str) -> Option<WallClock> {
    let bytes = value.as_bytes();
    if bytes.len() != 16 || bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' || bytes[13] != b':' {
        return None;
    }
    let year = value.get(0..4)?.parse().ok()?;
    let month = value.get(5..7)?.parse().ok()?;
    let day = value.get(8..10)?.parse().ok()?;
    let hour = value.get(11..13)?.parse().ok()?;
    let minute = value.get(14..16)?.parse().ok()?;
    Some(WallClock {
        year,
        month,
        day,
        hour,
        minute,
    })
}

/// Convert a `YYYY-MM-DDTHH:MM` Chicago wall-clock string to the UTC
/// instant it names. `None` for malformed or impossible calendar fields.
pub fn local_to_utc(value: &str) -> Option<DateTime<Utc>> {
    let desired = parse_datetime_local(value)?;

    // Initial guess: treat the components as if they were UTC.
    let mut guess = Utc
        .with_ymd_and_hms(
            desired.year,
            desired.month,
            desired.day,
            desired.hour,
            desired.minute,
            0,
        )
        .single()?;

    for _ in 0..2 {
        let observed = WallClock::of_instant(guess);
        let delta = desired.ordinal_minutes() - observed.ordinal_minutes();
        if delta == 0 {
            break;
        }
        guess += Duration::minutes(delta);
    }

    Some(guess)
}

/// Format a UTC instant as the Chicago `datetime-local` string.
#[must_use]
pub fn utc_to_local(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&TZ).format("%Y-%m-%dT%H:%M").to_string()
}

/// Chicago calendar date of a UTC instant, for day bucketing.
#[must_use]
pub fn utc_to_date_key(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&TZ).format("%Y-%m-%d").to_string()
}

/// The current `YYYY-MM` month key in Chicago.
#[must_use]
pub fn current_month_key() -> String {
    Utc::now().with_timezone(&TZ).format("%Y-%m").to_string()
}

#[must_use]
pub fn is_month_key(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// Human label for a month key, e.g. `2026-03` -> `March 2026`.
#[must_use]
pub fn month_key_label(month_key: &str) -> String {
    let parsed = month_key
        .split_once('-')
        .and_then(|(year, month)| Some((year.parse::<i32>().ok()?, month.parse::<u32>().ok()?)))
        .and_then(|(year, month)| NaiveDate::from_ymd_opt(year, month, 15));
    match parsed {
        Some(date) => date.format("%B %Y").to_string(),
        None => month_key.to_string(),
    }
}

/// Strict calendar date check: `YYYY-MM-DD` with no rollover
/// (e.g. `2025-02-30` is rejected).
#[must_use]
pub fn is_real_iso_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}
