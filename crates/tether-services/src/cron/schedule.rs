//! Schedule math.
//!
//! Next-run computation for the three schedule kinds, a 5/6-field cron
//! expression evaluator (leading seconds optional, Vixie-style day
//! matching), and the error-backoff ladder.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use tether_types::cron::{CronJobState, CronSchedule, JobStatus, ScheduleKind};

use crate::error::{Result, ServiceError};

/// Forward-search bound for cron expressions (~4 years), so an
/// unsatisfiable expression terminates instead of looping.
const SEARCH_BOUND_DAYS: i64 = 1461;

/// Error-backoff ladder indexed by consecutive error count; the last
/// step saturates.
const BACKOFF_LADDER_SECS: &[i64] = &[30, 60, 300, 900, 3600];

/// Backoff duration after `consecutive_errors` failures.
pub fn error_backoff(consecutive_errors: u32) -> Duration {
    if consecutive_errors == 0 {
        return Duration::zero();
    }
    let idx = (consecutive_errors as usize - 1).min(BACKOFF_LADDER_SECS.len() - 1);
    Duration::seconds(BACKOFF_LADDER_SECS[idx])
}

/// Compute the next run strictly after `from`.
///
/// `at` schedules return their instant while it is still in the future
/// and `None` afterwards; `every` schedules return `from + interval`;
/// cron schedules search forward from `from + 1s`. A non-zero stagger is
/// added to the result.
pub fn next_run_after(
    schedule: &CronSchedule,
    from: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let base = match schedule.kind {
        ScheduleKind::At => {
            let at = schedule
                .at
                .ok_or_else(|| ServiceError::InvalidSchedule("at schedule without instant".into()))?;
            if at > from { Some(at) } else { None }
        }
        ScheduleKind::Every => {
            let every_ms = schedule
                .every_ms
                .ok_or_else(|| ServiceError::InvalidSchedule("every schedule without interval".into()))?;
            if every_ms <= 0 {
                return Err(ServiceError::InvalidSchedule(
                    "interval must be positive".into(),
                ));
            }
            Some(from + Duration::milliseconds(every_ms))
        }
        ScheduleKind::Cron => {
            let expr = schedule
                .expr
                .as_deref()
                .ok_or_else(|| ServiceError::InvalidSchedule("cron schedule without expression".into()))?;
            CronExpr::parse(expr)?.next_after(from)
        }
    };

    Ok(base.map(|t| {
        if schedule.stagger_ms != 0 {
            t + Duration::milliseconds(schedule.stagger_ms)
        } else {
            t
        }
    }))
}

/// Whether a job is due to start at `now`.
///
/// Due means: enabled, not already running, past any error backoff, and
/// strictly past its `next_run_at`.
pub fn should_run(state: &CronJobState, now: DateTime<Utc>) -> bool {
    if !state.enabled || state.running_at.is_some() {
        return false;
    }
    if let Some(backoff_until) = state.error_backoff_until
        && now < backoff_until
    {
        return false;
    }
    match state.next_run_at {
        Some(next) => now > next,
        None => false,
    }
}

/// The effective next run after a failed run: the later of the computed
/// schedule time and the backoff expiry.
pub fn apply_backoff(
    state: &CronJobState,
    next: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    if state.last_status != Some(JobStatus::Error) {
        return (next, None);
    }
    let backoff_until = now + error_backoff(state.consecutive_errors);
    let effective = next.map(|n| n.max(backoff_until));
    (effective, Some(backoff_until))
}

/// A parsed cron expression.
///
/// Fields: `[sec] min hour dom month dow` with sec ∈ 0–59, min ∈ 0–59,
/// hour ∈ 0–23, dom ∈ 1–31, month ∈ 1–12, dow ∈ 0–6 (0 = Sunday).
/// Supports `*`, `*/n`, `a-b`, `a,b,c`, and `a/b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    sec: u64,
    min: u64,
    hour: u64,
    dom: u64,
    month: u64,
    dow: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse a 5- or 6-field expression. Missing seconds default to 0.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (sec_spec, rest): (&str, &[&str]) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => {
                return Err(ServiceError::InvalidCronExpression(format!(
                    "expected 5 or 6 fields, got {n}: {expr}"
                )));
            }
        };

        Ok(Self {
            sec: parse_field(sec_spec, 0, 59)?,
            min: parse_field(rest[0], 0, 59)?,
            hour: parse_field(rest[1], 0, 23)?,
            dom: parse_field(rest[2], 1, 31)?,
            month: parse_field(rest[3], 1, 12)?,
            dow: parse_field(rest[4], 0, 6)?,
            dom_restricted: rest[2] != "*",
            dow_restricted: rest[4] != "*",
        })
    }

    /// The first instant strictly after `after` matching this expression,
    /// or `None` within the search bound.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_second(after) + Duration::seconds(1);
        let limit = after + Duration::days(SEARCH_BOUND_DAYS);

        while t <= limit {
            if !bit(self.month, t.month()) {
                t = start_of_next_month(t);
                continue;
            }
            if !self.day_matches(t) {
                t = start_of_next_day(t);
                continue;
            }
            if !bit(self.hour, t.hour()) {
                t = start_of_next_hour(t);
                continue;
            }
            if !bit(self.min, t.minute()) {
                t = start_of_next_minute(t);
                continue;
            }
            if !bit(self.sec, t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    /// Vixie day matching: with both day fields restricted, either may
    /// match; with one restricted, it governs; with neither, every day
    /// matches.
    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom_ok = bit(self.dom, t.day());
        let dow_ok = bit(self.dow, t.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

/// Parse one field spec into a bitmask over `[min, max]`.
fn parse_field(spec: &str, min: u32, max: u32) -> Result<u64> {
    let mut mask = 0u64;

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(ServiceError::InvalidCronExpression(format!(
                "empty list entry in field: {spec}"
            )));
        }

        let (range_spec, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| {
                    ServiceError::InvalidCronExpression(format!("bad step: {part}"))
                })?;
                if step == 0 {
                    return Err(ServiceError::InvalidCronExpression(format!(
                        "zero step: {part}"
                    )));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_spec == "*" {
            (min, max)
        } else if let Some((a, b)) = range_spec.split_once('-') {
            let lo = parse_number(a, min, max, spec)?;
            let hi = parse_number(b, min, max, spec)?;
            if lo > hi {
                return Err(ServiceError::InvalidCronExpression(format!(
                    "inverted range: {part}"
                )));
            }
            (lo, hi)
        } else {
            let value = parse_number(range_spec, min, max, spec)?;
            // `a/b` means: starting at a, step b, to the field maximum.
            if part.contains('/') { (value, max) } else { (value, value) }
        };

        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }

    if mask == 0 {
        return Err(ServiceError::InvalidCronExpression(format!(
            "field matches nothing: {spec}"
        )));
    }
    Ok(mask)
}

fn parse_number(s: &str, min: u32, max: u32, field: &str) -> Result<u32> {
    let value: u32 = s
        .trim()
        .parse()
        .map_err(|_| ServiceError::InvalidCronExpression(format!("bad number `{s}` in {field}")))?;
    if value < min || value > max {
        return Err(ServiceError::InvalidCronExpression(format!(
            "value {value} out of range {min}-{max} in {field}"
        )));
    }
    Ok(value)
}

fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), t.minute(), t.second())
        .single()
        .unwrap_or(t)
}

fn start_of_next_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_second(t) + Duration::seconds(60 - t.second() as i64)
}

fn start_of_next_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    start_of_next_minute(t) + Duration::minutes(59 - t.minute() as i64)
}

fn start_of_next_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let next = t.date_naive() + Duration::days(1);
    Utc.with_ymd_and_hms(next.year(), next.month(), next.day(), 0, 0, 0)
        .single()
        .unwrap_or(t + Duration::days(1))
}

fn start_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(t + Duration::days(28))
}
