//! Trigger descriptors: cron expressions and ISO-8601 intervals.
//!
//! A trigger is only a description; firing is done by a trigger scheduler. Validation
//! happens here so that an invalid descriptor is rejected before registration.

use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::kernel::error::ActionsError;

const ISO_8601_TIME_PREFIX: &str = "PT";

/// Time zone assumed when a cron trigger does not name one.
pub const DEFAULT_TIME_ZONE: &str = "UTC";

/// Unit for building interval triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
}

impl IntervalUnit {
    fn suffix(self) -> &'static str {
        match self {
            IntervalUnit::Seconds => "S",
            IntervalUnit::Minutes => "M",
            IntervalUnit::Hours => "H",
        }
    }
}

/// Time-based firing rule attached to an action instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Cron expression (5, 6 or 7 fields) evaluated in `time_zone`, not firing before `start_at`.
    Cron {
        expression: String,
        time_zone: String,
        start_at: Option<DateTime<Utc>>,
    },
    /// ISO-8601 interval such as `2024-01-01T00:00:00Z/PT30S`; `repeat_count` of -1 repeats forever.
    Interval {
        iso8601_interval: String,
        repeat_count: i64,
    },
}

impl Trigger {
    pub fn cron(expression: impl Into<String>) -> Self {
        Trigger::Cron {
            expression: expression.into(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            start_at: None,
        }
    }

    pub fn cron_in_zone(
        expression: impl Into<String>,
        time_zone: impl Into<String>,
        start_at: Option<DateTime<Utc>>,
    ) -> Self {
        Trigger::Cron {
            expression: expression.into(),
            time_zone: time_zone.into(),
            start_at,
        }
    }

    /// Builds an interval trigger starting at `start_at` (now when `None`).
    pub fn interval(
        interval: u32,
        unit: IntervalUnit,
        repeat_count: i64,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ActionsError> {
        if interval == 0 {
            return Err(ActionsError::Validation(format!(
                "Invalid interval {} specified for the interval trigger",
                interval
            )));
        }
        let start = start_at.unwrap_or_else(Utc::now);
        Ok(Trigger::Interval {
            iso8601_interval: format!(
                "{}/{}{}{}",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
                ISO_8601_TIME_PREFIX,
                interval,
                unit.suffix()
            ),
            repeat_count,
        })
    }

    pub fn validate(&self) -> Result<(), ActionsError> {
        match self {
            Trigger::Cron {
                expression,
                time_zone,
                ..
            } => {
                parse_cron(expression)?;
                parse_time_zone(time_zone)?;
                Ok(())
            }
            Trigger::Interval {
                iso8601_interval,
                repeat_count,
            } => {
                if *repeat_count < -1 {
                    return Err(ActionsError::Validation(format!(
                        "repeat count must be -1 or greater, got {}",
                        repeat_count
                    )));
                }
                IsoInterval::parse(iso8601_interval)?;
                Ok(())
            }
        }
    }

    /// Computes the first fire time strictly after `after`.
    ///
    /// `anchor` is the registration time and is used as the interval start when the
    /// interval string carries none. `fired` is the number of fires already delivered.
    pub fn next_fire_after(
        &self,
        after: DateTime<Utc>,
        anchor: DateTime<Utc>,
        fired: u64,
    ) -> Result<Option<DateTime<Utc>>, ActionsError> {
        match self {
            Trigger::Cron {
                expression,
                time_zone,
                start_at,
            } => {
                let schedule = parse_cron(expression)?;
                let offset = parse_time_zone(time_zone)?;
                let from = match start_at {
                    Some(start) if *start > after => *start - Duration::nanoseconds(1),
                    _ => after,
                };
                Ok(schedule
                    .after(&from.with_timezone(&offset))
                    .next()
                    .map(|t| t.with_timezone(&Utc)))
            }
            Trigger::Interval {
                iso8601_interval,
                repeat_count,
            } => {
                let parsed = IsoInterval::parse(iso8601_interval)?;
                let limit = if parsed.repetitions.is_some() {
                    parsed.repetitions
                } else if *repeat_count >= 0 {
                    Some(*repeat_count as u64 + 1)
                } else {
                    None
                };
                if limit.is_some_and(|l| fired >= l) {
                    return Ok(None);
                }
                let start = parsed.start.unwrap_or(anchor);
                if after < start {
                    return Ok(Some(start));
                }
                let period_ms = parsed.period.num_milliseconds().max(1);
                let elapsed_ms = (after - start).num_milliseconds();
                let steps = elapsed_ms / period_ms + 1;
                // Past the representable range there is no next fire.
                Ok(steps
                    .checked_mul(period_ms)
                    .and_then(Duration::try_milliseconds)
                    .and_then(|offset| start.checked_add_signed(offset)))
            }
        }
    }
}

/// Parses a cron expression, accepting 5-field Unix form by prepending a seconds field.
pub fn parse_cron(expression: &str) -> Result<Schedule, ActionsError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| {
        ActionsError::Validation(format!("Invalid cron expression '{}': {}", expression, e))
    })
}

/// Resolves a time zone id to a fixed offset.
///
/// Supported forms are `UTC`, `GMT`, `Z` and `±HH:MM`.
pub fn parse_time_zone(time_zone: &str) -> Result<FixedOffset, ActionsError> {
    let tz = time_zone.trim();
    let invalid = || ActionsError::Validation(format!("Unsupported time zone '{}'", time_zone));
    if tz.is_empty() || tz.eq_ignore_ascii_case("UTC") || tz.eq_ignore_ascii_case("GMT") || tz == "Z"
    {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Parsed form of an ISO-8601 repeating interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsoInterval {
    pub repetitions: Option<u64>,
    pub start: Option<DateTime<Utc>>,
    pub period: Duration,
}

impl IsoInterval {
    /// Accepts `[R[n]/][start/]P[nD][T[nH][nM][nS]]`.
    pub fn parse(value: &str) -> Result<Self, ActionsError> {
        let invalid =
            |why: &str| ActionsError::Validation(format!("Invalid ISO-8601 interval '{}': {}", value, why));
        let mut parts: Vec<&str> = value.trim().split('/').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid("expected at most three '/' separated parts"));
        }
        let mut repetitions = None;
        if parts.len() > 1 && parts[0].starts_with('R') {
            let count = &parts[0][1..];
            if !count.is_empty() {
                repetitions = Some(count.parse::<u64>().map_err(|_| invalid("bad repeat count"))?);
            }
            parts.remove(0);
        }
        let (start, period) = match parts.as_slice() {
            [period] => (None, *period),
            [start, period] => {
                let start = DateTime::parse_from_rfc3339(start)
                    .map_err(|_| invalid("start is not an RFC 3339 timestamp"))?
                    .with_timezone(&Utc);
                (Some(start), *period)
            }
            _ => return Err(invalid("unexpected layout")),
        };
        let period = parse_duration(period).ok_or_else(|| invalid("bad duration"))?;
        if period <= Duration::zero() {
            return Err(invalid("duration must be positive"));
        }
        Ok(Self {
            repetitions,
            start,
            period,
        })
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };
    let mut total = Duration::zero();
    let mut seen_any = false;
    for (amount, unit) in components(date_part)? {
        let part = match unit {
            'D' => Duration::try_days(amount)?,
            'W' => Duration::try_weeks(amount)?,
            _ => return None,
        };
        total = total.checked_add(&part)?;
        seen_any = true;
    }
    if let Some(time_part) = time_part {
        if time_part.is_empty() {
            return None;
        }
        for (amount, unit) in components(time_part)? {
            let part = match unit {
                'H' => Duration::try_hours(amount)?,
                'M' => Duration::try_minutes(amount)?,
                'S' => Duration::try_seconds(amount)?,
                _ => return None,
            };
            total = total.checked_add(&part)?;
            seen_any = true;
        }
    }
    seen_any.then_some(total)
}

fn components(value: &str) -> Option<Vec<(i64, char)>> {
    let mut out = Vec::new();
    let mut digits = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if digits.is_empty() {
                return None;
            }
            out.push((digits.parse().ok()?, c));
            digits.clear();
        }
    }
    digits.is_empty().then_some(out)
}
