//! All-day events → instant ranges in the calendar's own timezone.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::availability::interval::TimeRange;
use crate::error::AvailabilityError;

/// Start or end of a calendar event: a timed instant or a bare date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Timed(DateTime<Utc>),
    AllDay(NaiveDate),
}

/// Local midnight of `date` in `tz`.
///
/// A few zones skip midnight on DST days; the first instant after the gap is
/// used then.
fn local_midnight(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>, AvailabilityError> {
    let naive = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Ok(dt.with_timezone(&Utc));
    }

    // Spring-forward gap at midnight: walk forward to the first valid minute.
    for minutes in 1..=180 {
        let probe = naive + chrono::Duration::minutes(minutes);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            warn!(
                %date,
                timezone = %tz,
                "Local midnight falls in a DST gap; using first valid instant"
            );
            return Ok(dt.with_timezone(&Utc));
        }
    }

    Err(AvailabilityError::InvalidInput(format!(
        "no valid local midnight for {date} in {tz}"
    )))
}

/// Turn an all-day span `[start_date, end_date)` into UTC instants using the
/// calendar's timezone. `end_date` is exclusive, as calendar APIs report it.
pub fn normalize_all_day(
    start_date: NaiveDate,
    end_date: NaiveDate,
    calendar_tz: &Tz,
) -> Result<TimeRange, AvailabilityError> {
    if end_date <= start_date {
        return Err(AvailabilityError::InvalidInput(format!(
            "all-day event ends {end_date} on or before its start {start_date}"
        )));
    }
    let start = local_midnight(calendar_tz, start_date)?;
    let end = local_midnight(calendar_tz, end_date)?;
    TimeRange::new(start, end)
}

/// Resolve an event's start/end pair into an instant range.
///
/// Mixed pairs (one timed, one date-only) are rejected.
pub fn resolve_event_range(
    start: EventTime,
    end: EventTime,
    calendar_tz: &Tz,
) -> Result<TimeRange, AvailabilityError> {
    match (start, end) {
        (EventTime::Timed(s), EventTime::Timed(e)) => TimeRange::new(s, e),
        (EventTime::AllDay(s), EventTime::AllDay(e)) => normalize_all_day(s, e, calendar_tz),
        _ => Err(AvailabilityError::InvalidInput(
            "event mixes a timed and an all-day boundary".into(),
        )),
    }
}
