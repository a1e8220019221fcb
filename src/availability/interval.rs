//! Half-open instant ranges and the interval math the engine is built on.
//!
//! Everything here works on UTC instants. Timezones only enter at the edges
//! (all-day normalization, presentation).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AvailabilityError;

/// A half-open `[start, end)` range of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting empty or inverted input.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AvailabilityError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Ranges can arrive through serde without passing `new`.
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        if self.start >= self.end {
            return Err(AvailabilityError::InvalidInput(format!(
                "range start {} is not before end {}",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Touching ranges (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `window`, or `None` when nothing is left.
    pub fn clip(&self, window: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(TimeRange { start, end })
    }

    /// Widened by `pad` on both sides, saturating at the representable limits.
    pub fn padded(&self, pad: Duration) -> TimeRange {
        TimeRange {
            start: saturating_sub(self.start, pad),
            end: saturating_add(self.end, pad),
        }
    }
}

/// `at + delta`, pinned to the latest representable instant on overflow.
pub fn saturating_add(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - delta`, pinned to the earliest representable instant on overflow.
pub fn saturating_sub(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A busy range reported by one calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    #[serde(flatten)]
    pub range: TimeRange,
    pub calendar_id: String,
}

impl BusyInterval {
    pub fn new(
        calendar_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, AvailabilityError> {
        Ok(Self {
            range: TimeRange::new(start, end)?,
            calendar_id: calendar_id.into(),
        })
    }
}

/// Reject any busy interval whose start is not before its end.
pub fn validate_busy(busy: &[BusyInterval]) -> Result<(), AvailabilityError> {
    for interval in busy {
        interval.range.validate().map_err(|e| {
            AvailabilityError::InvalidInput(format!(
                "busy interval from calendar {}: {e}",
                interval.calendar_id
            ))
        })?;
    }
    Ok(())
}

/// Merge overlapping or touching ranges into maximal busy runs.
///
/// Output is sorted by start and pairwise disjoint with a non-zero gap
/// between neighbours.
pub fn merge(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    if ranges.is_empty() {
        return Vec::new();
    }

    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());

    for range in ranges {
        if let Some(current) = merged.last_mut()
            && range.start <= current.end
        {
            if range.end > current.end {
                current.end = range.end;
            }
            continue;
        }
        merged.push(range);
    }

    merged
}

/// The parts of `window` not covered by `merged`, in order.
///
/// `merged` must already be sorted and disjoint (see [`merge`]) and lie
/// inside the window.
pub fn gaps(window: &TimeRange, merged: &[TimeRange]) -> Vec<TimeRange> {
    let mut free = Vec::new();
    let mut cursor = window.start;

    for run in merged {
        if run.start > cursor {
            free.push(TimeRange {
                start: cursor,
                end: run.start,
            });
        }
        if run.end > cursor {
            cursor = run.end;
        }
    }

    if window.end > cursor {
        free.push(TimeRange {
            start: cursor,
            end: window.end,
        });
    }

    free
}

/// Clip every interval to `window` and merge what survives.
pub fn busy_runs_within(window: &TimeRange, busy: &[BusyInterval]) -> Vec<TimeRange> {
    merge(
        busy.iter()
            .filter_map(|b| b.range.clip(window))
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{BusyInterval, TimeRange};

    /// 2026-03-02 at `hh:mm` UTC.
    pub fn at(hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hh, mm, 0).unwrap()
    }

    pub fn range(from: (u32, u32), to: (u32, u32)) -> TimeRange {
        TimeRange::new(at(from.0, from.1), at(to.0, to.1)).unwrap()
    }

    pub fn busy(from: (u32, u32), to: (u32, u32)) -> BusyInterval {
        BusyInterval {
            range: range(from, to),
            calendar_id: "primary".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::test_support::*;
    use super::*;

    #[test]
    fn new_rejects_inverted_and_empty() {
        assert!(TimeRange::new(at(10, 0), at(9, 0)).is_err());
        assert!(TimeRange::new(at(10, 0), at(10, 0)).is_err());
        assert!(TimeRange::new(at(9, 0), at(10, 0)).is_ok());
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        let a = range((10, 0), (10, 30));
        let b = range((10, 30), (11, 0));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&range((10, 29), (10, 45))));
    }

    #[test]
    fn clip_discards_outside() {
        let window = range((9, 0), (17, 0));
        assert_eq!(range((8, 0), (8, 30)).clip(&window), None);
        assert_eq!(range((17, 0), (18, 0)).clip(&window), None);
        assert_eq!(
            range((8, 0), (9, 30)).clip(&window),
            Some(range((9, 0), (9, 30)))
        );
    }

    #[test]
    fn merge_joins_adjacent_runs() {
        let merged = merge(vec![range((10, 30), (11, 0)), range((10, 0), (10, 30))]);
        assert_eq!(merged, vec![range((10, 0), (11, 0))]);
    }

    #[test]
    fn merge_keeps_contained_ranges_inside() {
        let merged = merge(vec![
            range((9, 0), (12, 0)),
            range((10, 0), (11, 0)),
            range((13, 0), (14, 0)),
        ]);
        assert_eq!(merged, vec![range((9, 0), (12, 0)), range((13, 0), (14, 0))]);
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge(vec![
            range((9, 0), (9, 45)),
            range((9, 30), (10, 0)),
            range((14, 0), (15, 0)),
            range((11, 0), (11, 15)),
        ]);
        assert_eq!(merge(once.clone()), once);
    }

    #[test]
    fn merge_is_idempotent_on_random_input() {
        let mut rng = StdRng::seed_from_u64(31);
        for _ in 0..200 {
            let count = rng.gen_range(0..40);
            let ranges: Vec<TimeRange> = (0..count)
                .map(|_| {
                    let start = at(8, 0) + Duration::minutes(rng.gen_range(0..600));
                    let end = start + Duration::minutes(rng.gen_range(1..120));
                    TimeRange { start, end }
                })
                .collect();

            let once = merge(ranges);
            assert_eq!(merge(once.clone()), once);
            for pair in once.windows(2) {
                assert!(pair[0].end < pair[1].start, "runs touch or overlap: {pair:?}");
            }
        }
    }

    #[test]
    fn padding_saturates_instead_of_overflowing() {
        let huge = Duration::days(365 * 300_000);
        let padded = range((10, 0), (11, 0)).padded(huge);
        assert_eq!(padded.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(padded.end, DateTime::<Utc>::MAX_UTC);

        let small = range((10, 0), (11, 0)).padded(Duration::minutes(30));
        assert_eq!(small, range((9, 30), (11, 30)));
    }

    #[test]
    fn gaps_before_between_after() {
        let window = range((9, 0), (17, 0));
        let merged = vec![range((10, 0), (11, 0)), range((13, 0), (14, 0))];
        assert_eq!(
            gaps(&window, &merged),
            vec![
                range((9, 0), (10, 0)),
                range((11, 0), (13, 0)),
                range((14, 0), (17, 0)),
            ]
        );
    }

    #[test]
    fn validate_busy_names_calendar() {
        let bad = BusyInterval {
            range: TimeRange {
                start: at(11, 0),
                end: at(10, 0),
            },
            calendar_id: "work".into(),
        };
        let err = validate_busy(&[busy((9, 0), (9, 30)), bad]).unwrap_err();
        assert!(err.to_string().contains("work"));
    }
}
