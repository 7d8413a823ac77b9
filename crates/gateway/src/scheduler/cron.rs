//! Cron field parsing and matching (spec §4.2).
//!
//! Five whitespace-separated fields `minute hour dom month dow`, evaluated
//! against UTC wall-clock time. Fields are parsed eagerly at `addSchedule`
//! time and cached as sorted unique-value sets (§4.2 "cron field ... cached
//! as sorted unique-value sets"; §9 "cron field is an ordered sorted set of
//! integers").
//!
//! Grounded on the teacher's `runtime/schedules/cron.rs` field-matching
//! shape, stripped of `chrono_tz` timezone handling — this hub's dialect is
//! UTC-only (SPEC_FULL.md Open Question: the distilled spec is silent on
//! per-entry timezones, so no timezone field exists in the data model).

use chrono::{DateTime, Datelike, Timelike, Utc};
use hub_domain::error::{Error, Result};

/// One cron field, parsed into a sorted, deduplicated set of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    values: Vec<u32>,
}

impl CronField {
    fn parse(raw: &str, min: u32, max: u32) -> Result<Self> {
        let mut values = Vec::new();
        for part in raw.split(',') {
            parse_part(part, min, max, &mut values)?;
        }
        values.sort_unstable();
        values.dedup();
        if values.is_empty() {
            return Err(Error::validation(format!(
                "cron field '{raw}' produced no values"
            )));
        }
        Ok(Self { values })
    }

    fn matches(&self, value: u32) -> bool {
        self.values.binary_search(&value).is_ok()
    }
}

fn parse_part(part: &str, min: u32, max: u32, out: &mut Vec<u32>) -> Result<()> {
    if part == "*" {
        out.extend(min..=max);
        return Ok(());
    }

    if let Some((range_or_star, step_str)) = part.split_once('/') {
        let step: u32 = step_str
            .parse()
            .map_err(|_| Error::validation(format!("invalid cron step '{part}'")))?;
        if step == 0 {
            return Err(Error::validation(format!("cron step must be nonzero: '{part}'")));
        }
        let (lo, hi) = if range_or_star == "*" {
            (min, max)
        } else {
            parse_range(range_or_star, min, max)?
        };
        let mut v = lo;
        while v <= hi {
            out.push(v);
            v += step;
        }
        return Ok(());
    }

    if let Some((lo_str, hi_str)) = part.split_once('-') {
        let lo: u32 = lo_str
            .parse()
            .map_err(|_| Error::validation(format!("invalid cron range '{part}'")))?;
        let hi: u32 = hi_str
            .parse()
            .map_err(|_| Error::validation(format!("invalid cron range '{part}'")))?;
        if lo > hi || lo < min || hi > max {
            return Err(Error::validation(format!(
                "cron range '{part}' out of bounds {min}-{max}"
            )));
        }
        out.extend(lo..=hi);
        return Ok(());
    }

    let n: u32 = part
        .parse()
        .map_err(|_| Error::validation(format!("invalid cron value '{part}'")))?;
    if n < min || n > max {
        return Err(Error::validation(format!(
            "cron value '{n}' out of bounds {min}-{max}"
        )));
    }
    out.push(n);
    Ok(())
}

fn parse_range(raw: &str, min: u32, max: u32) -> Result<(u32, u32)> {
    let n: u32 = raw
        .parse()
        .map_err(|_| Error::validation(format!("invalid cron value '{raw}'")))?;
    if n < min || n > max {
        return Err(Error::validation(format!(
            "cron value '{n}' out of bounds {min}-{max}"
        )));
    }
    Ok((n, max))
}

/// A fully parsed `minute hour dom month dow` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::validation(format!(
                "cron expression '{expr}' must have exactly 5 fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            dom: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            dow: CronField::parse(fields[4], 0, 6)?,
        })
    }

    /// Whether `at` (UTC) falls on a matching wall-clock minute.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.dom.matches(at.day())
            && self.month.matches(at.month())
            && self.dow.matches(at.weekday().num_days_from_sunday())
    }
}

/// The "minute key" used for tick dedup (spec §4.2 tick discipline).
pub fn minute_key(at: DateTime<Utc>) -> i64 {
    at.timestamp() / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn star_matches_every_minute() {
        let c = CronSchedule::parse("* * * * *").unwrap();
        assert!(c.matches(at(2026, 1, 1, 0, 0)));
        assert!(c.matches(at(2026, 1, 1, 23, 59)));
    }

    #[test]
    fn exact_minute_field() {
        let c = CronSchedule::parse("5 * * * *").unwrap();
        assert!(c.matches(at(2026, 1, 1, 10, 5)));
        assert!(!c.matches(at(2026, 1, 1, 10, 6)));
    }

    #[test]
    fn step_field() {
        let c = CronSchedule::parse("*/5 * * * *").unwrap();
        assert!(c.matches(at(2026, 1, 1, 0, 0)));
        assert!(c.matches(at(2026, 1, 1, 0, 5)));
        assert!(!c.matches(at(2026, 1, 1, 0, 6)));
    }

    #[test]
    fn range_and_list() {
        let c = CronSchedule::parse("0 9-17 * * 1,3,5").unwrap();
        assert!(c.matches(at(2026, 3, 2, 9, 0))); // Monday
        assert!(!c.matches(at(2026, 3, 3, 9, 0))); // Tuesday
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
    }

    #[test]
    fn rejects_zero_step() {
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn minute_key_is_stable_within_a_minute() {
        let a = minute_key(at(2026, 1, 1, 10, 30));
        let b = at(2026, 1, 1, 10, 30) + chrono::Duration::seconds(45);
        assert_eq!(a, minute_key(b));
        let c = at(2026, 1, 1, 10, 31);
        assert_ne!(a, minute_key(c));
    }
}
