//! Free/busy partitioning, free-slot search and point availability checks.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::availability::interval::{self, BusyInterval, TimeRange};
use crate::error::AvailabilityError;

/// A free-slot query.
///
/// `timezone` is the reporting timezone. It never takes part in arithmetic.
#[derive(Debug, Clone)]
pub struct AvailabilityWindow {
    pub range: TimeRange,
    pub min_duration: Duration,
    pub timezone: Tz,
}

impl AvailabilityWindow {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_duration_minutes: u32,
        timezone: Tz,
    ) -> Result<Self, AvailabilityError> {
        Ok(Self {
            range: TimeRange::new(start, end)?,
            min_duration: Duration::minutes(i64::from(min_duration_minutes)),
            timezone,
        })
    }
}

/// A sub-range of the window with no busy time, at least as long as requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    #[serde(flatten)]
    pub range: TimeRange,
}

impl FreeSlot {
    pub fn duration(&self) -> Duration {
        self.range.duration()
    }

    /// Human-readable rendering in the reporting timezone, e.g.
    /// `Mon Mar 2, 9:00 AM – 10:00 AM (60 min)`.
    pub fn display(&self, tz: &Tz) -> String {
        let start = self.range.start.with_timezone(tz);
        let end = self.range.end.with_timezone(tz);
        let end_fmt = if start.date_naive() == end.date_naive() {
            end.format("%-I:%M %p").to_string()
        } else {
            end.format("%a %b %-d, %-I:%M %p").to_string()
        };
        format!(
            "{} – {} ({} min)",
            start.format("%a %b %-d, %-I:%M %p"),
            end_fmt,
            self.duration().num_minutes()
        )
    }
}

/// Full partition of a window into busy runs and free gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub window: TimeRange,
    pub busy_runs: Vec<TimeRange>,
    pub free: Vec<TimeRange>,
}

/// Split `window` into merged busy runs and the gaps between them.
///
/// The two lists together tile the window: no gaps, no overlaps.
pub fn partition(
    window: &TimeRange,
    busy: &[BusyInterval],
) -> Result<Availability, AvailabilityError> {
    window.validate()?;
    interval::validate_busy(busy)?;

    let busy_runs = interval::busy_runs_within(window, busy);
    let free = interval::gaps(window, &busy_runs);

    Ok(Availability {
        window: *window,
        busy_runs,
        free,
    })
}

/// Free slots of at least `min_duration_minutes` inside `window`, in
/// chronological order.
pub fn compute_free_slots(
    window: &AvailabilityWindow,
    busy: &[BusyInterval],
    min_duration_minutes: u32,
) -> Result<Vec<FreeSlot>, AvailabilityError> {
    let min = Duration::minutes(i64::from(min_duration_minutes)).max(window.min_duration);
    let availability = partition(&window.range, busy)?;

    let slots: Vec<FreeSlot> = availability
        .free
        .into_iter()
        .filter(|gap| gap.duration() >= min)
        .map(|range| FreeSlot { range })
        .collect();

    debug!(
        busy_intervals = busy.len(),
        busy_runs = availability.busy_runs.len(),
        free_slots = slots.len(),
        min_minutes = min.num_minutes(),
        "Computed free slots"
    );

    Ok(slots)
}

/// Whether `range` is clear of every busy interval.
pub fn is_range_free(range: &TimeRange, busy: &[BusyInterval]) -> Result<bool, AvailabilityError> {
    range.validate()?;
    interval::validate_busy(busy)?;

    let runs = interval::merge(busy.iter().map(|b| b.range).collect());
    Ok(is_free_in_runs(range, &runs))
}

/// Binary search over merged runs: find the first run ending after
/// `range.start`; the range is free iff that run starts at or after `range.end`.
pub(crate) fn is_free_in_runs(range: &TimeRange, runs: &[TimeRange]) -> bool {
    let idx = runs.partition_point(|run| run.end <= range.start);
    runs.get(idx).is_none_or(|run| run.start >= range.end)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::availability::interval::test_support::*;

    fn window(from: (u32, u32), to: (u32, u32)) -> AvailabilityWindow {
        AvailabilityWindow {
            range: range(from, to),
            min_duration: Duration::zero(),
            timezone: chrono_tz::UTC,
        }
    }

    #[test]
    fn adjacent_busy_merge_into_one_run() {
        let busy = vec![busy((10, 0), (10, 30)), busy((10, 30), (11, 0))];
        let w = window((9, 0), (17, 0));

        let availability = partition(&w.range, &busy).unwrap();
        assert_eq!(availability.busy_runs, vec![range((10, 0), (11, 0))]);

        let slots = compute_free_slots(&w, &busy, 0).unwrap();
        let ranges: Vec<_> = slots.iter().map(|s| s.range).collect();
        assert_eq!(ranges, vec![range((9, 0), (10, 0)), range((11, 0), (17, 0))]);
    }

    #[test]
    fn no_busy_yields_whole_window() {
        let w = window((9, 0), (17, 0));
        let slots = compute_free_slots(&w, &[], 30).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].range, range((9, 0), (17, 0)));
    }

    #[test]
    fn busy_covering_window_yields_nothing() {
        let w = window((9, 0), (10, 0));
        let slots = compute_free_slots(&w, &[busy((9, 0), (10, 0))], 0).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn short_gaps_filtered_out() {
        let w = window((9, 0), (12, 0));
        let busy = vec![busy((9, 20), (10, 0)), busy((10, 15), (11, 0))];
        let slots = compute_free_slots(&w, &busy, 30).unwrap();
        let ranges: Vec<_> = slots.iter().map(|s| s.range).collect();
        assert_eq!(ranges, vec![range((11, 0), (12, 0))]);
    }

    #[test]
    fn window_min_duration_applies_too() {
        let mut w = window((9, 0), (12, 0));
        w.min_duration = Duration::minutes(90);
        let slots = compute_free_slots(&w, &[busy((10, 0), (10, 30))], 0).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].range, range((10, 30), (12, 0)));
    }

    #[test]
    fn invalid_busy_interval_is_rejected_not_dropped() {
        let w = window((9, 0), (17, 0));
        let bad = BusyInterval {
            range: TimeRange {
                start: at(12, 0),
                end: at(12, 0),
            },
            calendar_id: "primary".into(),
        };
        assert!(compute_free_slots(&w, &[bad.clone()], 0).is_err());
        assert!(is_range_free(&range((9, 0), (9, 30)), &[bad]).is_err());
    }

    #[test]
    fn busy_outside_window_ignored() {
        let w = window((9, 0), (10, 0));
        let busy = vec![busy((7, 0), (8, 0)), busy((10, 0), (11, 0))];
        let slots = compute_free_slots(&w, &busy, 0).unwrap();
        assert_eq!(slots[0].range, range((9, 0), (10, 0)));
    }

    #[test]
    fn duplicate_meeting_across_calendars_counts_once_as_busy() {
        let mut other = busy((10, 0), (11, 0));
        other.calendar_id = "team".into();
        let busy = vec![busy((10, 0), (11, 0)), other];
        let availability = partition(&range((9, 0), (12, 0)), &busy).unwrap();
        assert_eq!(availability.busy_runs, vec![range((10, 0), (11, 0))]);
    }

    #[test]
    fn range_free_checks() {
        let busy = vec![busy((10, 0), (11, 0)), busy((13, 0), (14, 0))];
        assert!(is_range_free(&range((9, 0), (10, 0)), &busy).unwrap());
        assert!(is_range_free(&range((11, 0), (13, 0)), &busy).unwrap());
        assert!(!is_range_free(&range((10, 59), (11, 30)), &busy).unwrap());
        assert!(!is_range_free(&range((12, 0), (15, 0)), &busy).unwrap());
        assert!(is_range_free(&range((14, 0), (15, 0)), &busy).unwrap());
        assert!(is_range_free(&range((9, 0), (9, 30)), &[]).unwrap());
    }

    #[test]
    fn display_uses_reporting_timezone() {
        let slot = FreeSlot {
            range: range((14, 0), (15, 0)),
        };
        let rendered = slot.display(&chrono_tz::America::New_York);
        assert_eq!(rendered, "Mon Mar 2, 9:00 AM – 10:00 AM (60 min)");
    }

    // ── Randomized invariants (seeded) ─────────────────────────────

    fn random_busy(rng: &mut StdRng, count: usize) -> Vec<BusyInterval> {
        let base = at(8, 0);
        (0..count)
            .map(|i| {
                let start = base + Duration::minutes(rng.gen_range(0..600));
                let end = start + Duration::minutes(rng.gen_range(1..120));
                BusyInterval {
                    range: TimeRange { start, end },
                    calendar_id: format!("cal-{}", i % 3),
                }
            })
            .collect()
    }

    #[test]
    fn busy_runs_and_free_tile_the_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = range((9, 0), (17, 0));
        for _ in 0..200 {
            let count = rng.gen_range(0..12);
            let busy = random_busy(&mut rng, count);
            let availability = partition(&w, &busy).unwrap();

            let mut pieces: Vec<TimeRange> = availability
                .busy_runs
                .iter()
                .chain(availability.free.iter())
                .copied()
                .collect();
            pieces.sort_by_key(|r| r.start);

            let mut cursor = w.start;
            for piece in &pieces {
                assert_eq!(piece.start, cursor, "gap or overlap at {cursor}");
                assert!(piece.start < piece.end);
                cursor = piece.end;
            }
            assert_eq!(cursor, w.end);
        }
    }

    #[test]
    fn free_slots_respect_minimum() {
        let mut rng = StdRng::seed_from_u64(11);
        let w = window((9, 0), (17, 0));
        for _ in 0..200 {
            let count = rng.gen_range(0..10);
            let busy = random_busy(&mut rng, count);
            let min = rng.gen_range(0..90);
            for slot in compute_free_slots(&w, &busy, min).unwrap() {
                assert!(slot.duration() >= Duration::minutes(i64::from(min)));
                assert!(is_range_free(&slot.range, &busy).unwrap());
            }
        }
    }

    #[test]
    fn adding_busy_time_never_grows_availability() {
        let mut rng = StdRng::seed_from_u64(23);
        let w = window((9, 0), (17, 0));
        for _ in 0..200 {
            let count = rng.gen_range(0..8);
            let mut busy = random_busy(&mut rng, count);
            let before = compute_free_slots(&w, &busy, 0).unwrap();
            let before_runs = partition(&w.range, &busy).unwrap().busy_runs;

            busy.extend(random_busy(&mut rng, 1));
            let after = compute_free_slots(&w, &busy, 0).unwrap();

            // every new slot sits inside some old slot
            for slot in &after {
                assert!(before.iter().any(|b| b.range.contains(&slot.range)));
            }
            // nothing busy before became free
            for run in &before_runs {
                assert!(after.iter().all(|s| !s.range.overlaps(run)));
            }
        }
    }

    #[test]
    fn window_validation() {
        assert!(
            AvailabilityWindow::new(at(10, 0), at(9, 0), 30, chrono_tz::UTC).is_err()
        );
        let now = Utc::now();
        assert!(
            AvailabilityWindow::new(now, now + Duration::hours(1), 30, chrono_tz::UTC).is_ok()
        );
    }
}
