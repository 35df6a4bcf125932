//! Due-calculation for interval and cron schedules.
//!
//! Interval strings use the grammar `<integer><unit>` with unit in
//! {s, m, h, d}. Cron expressions are standard five-field crontab lines;
//! a seconds column is prepended before handing them to the `cron` crate,
//! which expects six fields. Six- and seven-field expressions pass through.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid interval '{0}' (expected <integer><unit>, unit in s/m/h/d)")]
    InvalidInterval(String),
    #[error("invalid cron expression '{value}': {reason}")]
    InvalidCron { value: String, reason: String },
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),
}

/// Parse an interval string like `30s`, `5m`, `2h`, `1d`.
pub fn parse_interval(input: &str) -> Result<Duration, ScheduleError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ScheduleError::InvalidInterval(input.to_string()))?;
    let (digits, unit) = trimmed.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| ScheduleError::InvalidInterval(input.to_string()))?;
    let secs = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(ScheduleError::InvalidInterval(input.to_string())),
    };
    Ok(Duration::from_secs(n * secs))
}

/// Parse a cron expression, accepting the standard five-field form.
pub fn parse_cron(expr: &str) -> Result<Schedule, ScheduleError> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        value: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an IANA timezone name like `Europe/Berlin`.
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// A workspace's schedule, resolved from its config fields.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    Interval { every: Duration, raw: String },
    Cron {
        schedule: Box<Schedule>,
        tz: Option<Tz>,
        raw: String,
    },
    /// Neither interval nor cron configured: never due. Rejected at config
    /// load, but a heartbeat reaching here is simply skipped.
    Manual,
}

impl ScheduleSpec {
    /// Resolve from already-validated config fields. Conflicting fields are
    /// rejected at config load; here interval wins.
    pub fn resolve(
        interval: Option<&str>,
        cron: Option<&str>,
        timezone: Option<&str>,
    ) -> Result<Self, ScheduleError> {
        if let Some(raw) = interval {
            return Ok(Self::Interval {
                every: parse_interval(raw)?,
                raw: raw.to_string(),
            });
        }
        if let Some(raw) = cron {
            let tz = timezone.map(parse_timezone).transpose()?;
            return Ok(Self::Cron {
                schedule: Box::new(parse_cron(raw)?),
                tz,
                raw: raw.to_string(),
            });
        }
        Ok(Self::Manual)
    }

    /// Is a heartbeat with this schedule due at `now`?
    ///
    /// Never-run heartbeats are always due. Interval boundaries are
    /// inclusive: exactly-elapsed counts as due. Cron heartbeats are due
    /// once the next occurrence strictly after `last_run` has passed.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_run else {
            return !matches!(self, Self::Manual);
        };
        match self {
            Self::Interval { every, .. } => {
                (now - last).num_milliseconds() >= every.as_millis() as i64
            }
            Self::Cron { .. } => self
                .next_occurrence(last)
                .is_some_and(|next| next <= now),
            Self::Manual => false,
        }
    }

    /// When this schedule fires next, for tick events and `status`.
    pub fn next_run(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every, .. } => match last_run {
                Some(last) => {
                    let every = chrono::Duration::milliseconds(every.as_millis() as i64);
                    Some(last + every)
                }
                None => Some(now),
            },
            Self::Cron { .. } => match last_run {
                Some(last) => self.next_occurrence(last),
                None => Some(now),
            },
            Self::Manual => None,
        }
    }

    /// Short human description, e.g. `every 30m` or `cron 0 9 * * 1-5`.
    pub fn describe(&self) -> String {
        match self {
            Self::Interval { raw, .. } => format!("every {raw}"),
            Self::Cron { raw, tz: Some(tz), .. } => format!("cron {raw} ({tz})"),
            Self::Cron { raw, tz: None, .. } => format!("cron {raw}"),
            Self::Manual => "manual".to_string(),
        }
    }

    /// First cron occurrence strictly after `after`, in UTC.
    fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Self::Cron { schedule, tz, .. } = self else {
            return None;
        };
        match tz {
            Some(tz) => schedule
                .after(&after.with_timezone(tz))
                .next()
                .map(|next| next.with_timezone(&Utc)),
            None => schedule.after(&after).next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_interval_all_units() {
        assert_eq!(parse_interval("7s").unwrap().as_millis(), 7_000);
        assert_eq!(parse_interval("7m").unwrap().as_millis(), 420_000);
        assert_eq!(parse_interval("7h").unwrap().as_millis(), 25_200_000);
        assert_eq!(parse_interval("7d").unwrap().as_millis(), 604_800_000);
    }

    #[test]
    fn parse_interval_rejects_garbage() {
        for bad in ["", "7", "s", "7w", "7 m", "m7", "-7s", "soon", "7.5h"] {
            assert!(parse_interval(bad).is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn parse_interval_error_names_offender() {
        let err = parse_interval("7w").unwrap_err();
        assert!(err.to_string().contains("7w"));
    }

    #[test]
    fn parse_cron_accepts_five_field_form() {
        assert!(parse_cron("0 9 * * 1-5").is_ok());
        assert!(parse_cron("*/5 * * * *").is_ok());
    }

    #[test]
    fn parse_cron_accepts_six_field_form() {
        assert!(parse_cron("0 0 9 * * Mon-Fri").is_ok());
    }

    #[test]
    fn parse_cron_rejects_garbage() {
        assert!(parse_cron("not a cron").is_err());
        assert!(parse_cron("99 99 * * *").is_err());
    }

    #[test]
    fn parse_timezone_known_and_unknown() {
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    fn interval_spec(raw: &str) -> ScheduleSpec {
        ScheduleSpec::resolve(Some(raw), None, None).unwrap()
    }

    #[test]
    fn never_run_is_always_due() {
        let spec = interval_spec("1h");
        assert!(spec.is_due(None, Utc::now()));

        let cron = ScheduleSpec::resolve(None, Some("0 9 * * *"), None).unwrap();
        assert!(cron.is_due(None, Utc::now()));
    }

    #[test]
    fn manual_schedule_is_never_due() {
        let spec = ScheduleSpec::resolve(None, None, None).unwrap();
        assert!(!spec.is_due(None, Utc::now()));
        assert!(!spec.is_due(Some(Utc::now()), Utc::now()));
        assert_eq!(spec.next_run(None, Utc::now()), None);
    }

    #[test]
    fn interval_boundary_is_inclusive() {
        let spec = interval_spec("1m");
        let last = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();

        // Just before the boundary: not due.
        let almost = last + chrono::Duration::milliseconds(59_999);
        assert!(!spec.is_due(Some(last), almost));

        // Exactly elapsed: due.
        let exactly = last + chrono::Duration::seconds(60);
        assert!(spec.is_due(Some(last), exactly));

        // Well past: due.
        assert!(spec.is_due(Some(last), last + chrono::Duration::hours(2)));
    }

    #[test]
    fn cron_due_after_next_occurrence_passes() {
        let spec = ScheduleSpec::resolve(None, Some("0 9 * * *"), None).unwrap();
        let last = Utc.with_ymd_and_hms(2026, 8, 5, 9, 0, 0).unwrap();

        let before_next = Utc.with_ymd_and_hms(2026, 8, 6, 8, 59, 0).unwrap();
        assert!(!spec.is_due(Some(last), before_next));

        let after_next = Utc.with_ymd_and_hms(2026, 8, 6, 9, 0, 30).unwrap();
        assert!(spec.is_due(Some(last), after_next));
    }

    #[test]
    fn cron_timezone_shifts_occurrences() {
        // 09:00 in Berlin is 07:00 UTC during CEST (August).
        let spec =
            ScheduleSpec::resolve(None, Some("0 9 * * *"), Some("Europe/Berlin")).unwrap();
        let last = Utc.with_ymd_and_hms(2026, 8, 5, 7, 0, 0).unwrap();
        let next = spec.next_run(Some(last), last).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 6, 7, 0, 0).unwrap());
    }

    #[test]
    fn interval_next_run_adds_interval() {
        let spec = interval_spec("30m");
        let last = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        assert_eq!(
            spec.next_run(Some(last), last),
            Some(last + chrono::Duration::minutes(30))
        );
    }

    #[test]
    fn describe_renders_schedule_kind() {
        assert_eq!(interval_spec("30m").describe(), "every 30m");
        let cron = ScheduleSpec::resolve(None, Some("0 9 * * 1-5"), None).unwrap();
        assert_eq!(cron.describe(), "cron 0 9 * * 1-5");
        assert_eq!(ScheduleSpec::resolve(None, None, None).unwrap().describe(), "manual");
    }
}
