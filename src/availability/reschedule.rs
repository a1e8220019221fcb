//! Create availability by moving conflicting events.
//!
//! Planning is pure: it decides where every conflicting event should go.
//! Applying pushes the moves to a calendar provider with bounded
//! concurrency and reports per-event outcomes instead of failing the batch.

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::availability::engine::is_free_in_runs;
use crate::availability::interval::{self, TimeRange, saturating_add, saturating_sub};
use crate::calendar::{CalendarProvider, EditScope};
use crate::error::{AvailabilityError, ProviderErrorKind};

/// An event as the planner sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub calendar_id: String,
    #[serde(flatten)]
    pub range: TimeRange,
    pub scope: EditScope,
}

/// Search bounds for a move.
#[derive(Debug, Clone, Copy)]
pub struct RescheduleOptions {
    /// How far from its original start an event may travel, either way.
    pub horizon: Duration,
    /// Never place an event earlier than this (usually "now").
    pub not_before: Option<DateTime<Utc>>,
}

impl RescheduleOptions {
    pub fn with_horizon(horizon: Duration) -> Self {
        Self {
            horizon,
            not_before: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub event_id: String,
    pub calendar_id: String,
    pub from: TimeRange,
    pub to: TimeRange,
    pub scope: EditScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoSlotWithinHorizon { horizon_minutes: i64 },
    Provider {
        error: ProviderErrorKind,
        message: String,
    },
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSlotWithinHorizon { horizon_minutes } => {
                write!(f, "no free slot within {horizon_minutes} minutes")
            }
            Self::Provider { error, message } => write!(f, "calendar {error:?}: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unresolved {
    pub event_id: String,
    pub reason: UnresolvedReason,
}

/// Outcome of planning or applying a reschedule.
///
/// A non-empty `unresolved` list is partial success, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReschedulePlan {
    pub moved: Vec<PlannedMove>,
    pub unresolved: Vec<Unresolved>,
}

impl ReschedulePlan {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Plan moves that clear `protect` of every overlapping event.
///
/// Events that do not overlap `protect` are left alone and appear in neither
/// list. Conflicting events are placed in chronological order; each one
/// avoids the protect range, every event that is staying put, and the
/// placements chosen before it.
pub fn plan_rescheduling(
    protect: &TimeRange,
    events: &[ScheduledEvent],
    options: &RescheduleOptions,
) -> Result<ReschedulePlan, AvailabilityError> {
    plan_rescheduling_around(protect, events, &[], options)
}

/// [`plan_rescheduling`] with extra busy time that is never moved, such as
/// other calendars or all-day events.
pub fn plan_rescheduling_around(
    protect: &TimeRange,
    events: &[ScheduledEvent],
    pinned: &[TimeRange],
    options: &RescheduleOptions,
) -> Result<ReschedulePlan, AvailabilityError> {
    protect.validate()?;
    if options.horizon < Duration::zero() {
        return Err(AvailabilityError::InvalidInput(
            "search horizon must not be negative".into(),
        ));
    }
    for event in events {
        event.range.validate().map_err(|e| {
            AvailabilityError::InvalidInput(format!("event {}: {e}", event.id))
        })?;
    }
    for range in pinned {
        range.validate()?;
    }

    let (mut affected, unaffected): (Vec<&ScheduledEvent>, Vec<&ScheduledEvent>) =
        events.iter().partition(|e| e.range.overlaps(protect));
    affected.sort_by(|a, b| a.range.start.cmp(&b.range.start).then(a.id.cmp(&b.id)));

    debug!(
        affected = affected.len(),
        untouched = unaffected.len(),
        pinned = pinned.len(),
        "Planning reschedule"
    );

    let mut fixed: Vec<TimeRange> = unaffected.iter().map(|e| e.range).collect();
    fixed.extend_from_slice(pinned);
    fixed.push(*protect);

    let mut plan = ReschedulePlan::default();
    for (i, event) in affected.iter().enumerate() {
        // Events not yet handled still sit at their original time.
        let mut blocked = fixed.clone();
        blocked.extend(affected[i + 1..].iter().map(|e| e.range));
        blocked.extend(plan.moved.iter().map(|m| m.to));
        let runs = interval::merge(blocked);

        match find_nearest_slot(&event.range, &runs, options) {
            Some(to) => {
                debug!(event_id = %event.id, from = %event.range.start, to = %to.start, "Planned move");
                plan.moved.push(PlannedMove {
                    event_id: event.id.clone(),
                    calendar_id: event.calendar_id.clone(),
                    from: event.range,
                    to,
                    scope: event.scope.clone(),
                });
            }
            None => {
                debug!(event_id = %event.id, "No slot within horizon");
                // It stays where it is, so later placements must avoid it.
                fixed.push(event.range);
                plan.unresolved.push(Unresolved {
                    event_id: event.id.clone(),
                    reason: UnresolvedReason::NoSlotWithinHorizon {
                        horizon_minutes: options.horizon.num_minutes(),
                    },
                });
            }
        }
    }

    Ok(plan)
}

/// Nearest same-length free range: forward from the original start first,
/// then backward.
fn find_nearest_slot(
    original: &TimeRange,
    runs: &[TimeRange],
    options: &RescheduleOptions,
) -> Option<TimeRange> {
    let duration = original.duration();
    let earliest = saturating_sub(original.start, options.horizon);
    let earliest = options.not_before.map_or(earliest, |floor| floor.max(earliest));
    let latest = saturating_add(original.start, options.horizon);

    search_forward(original.start.max(earliest), latest, duration, runs)
        .or_else(|| search_backward(original.start.min(latest), earliest, duration, runs))
}

fn search_forward(
    mut start: DateTime<Utc>,
    latest: DateTime<Utc>,
    duration: Duration,
    runs: &[TimeRange],
) -> Option<TimeRange> {
    while start <= latest {
        let candidate = TimeRange {
            start,
            end: start.checked_add_signed(duration)?,
        };
        let idx = runs.partition_point(|run| run.end <= candidate.start);
        match runs.get(idx) {
            Some(run) if run.start < candidate.end => start = run.end,
            _ => return Some(candidate),
        }
    }
    None
}

fn search_backward(
    mut start: DateTime<Utc>,
    earliest: DateTime<Utc>,
    duration: Duration,
    runs: &[TimeRange],
) -> Option<TimeRange> {
    while start >= earliest {
        let candidate = TimeRange {
            start,
            end: start.checked_add_signed(duration)?,
        };
        if is_free_in_runs(&candidate, runs) {
            return Some(candidate);
        }
        // Runs are disjoint and sorted, so the last one starting before the
        // candidate ends is the blocker with the latest start.
        let idx = runs.partition_point(|run| run.start < candidate.end);
        match idx.checked_sub(1).and_then(|i| runs.get(i)) {
            Some(run) => start = run.start.checked_sub_signed(duration)?,
            None => return Some(candidate),
        }
    }
    None
}

/// Push planned moves to the provider, at most `concurrency` at a time.
///
/// Moves on distinct events commute, so completion order does not matter.
/// Failed updates land in `unresolved` with the provider's classification;
/// the batch always runs to completion.
pub async fn apply_plan(
    provider: &dyn CalendarProvider,
    plan: ReschedulePlan,
    concurrency: usize,
) -> ReschedulePlan {
    let ReschedulePlan { moved, unresolved } = plan;
    let limit = concurrency.max(1);

    let results: Vec<_> = futures::stream::iter(moved)
        .map(|mv| async move {
            let result = provider
                .update_event(&mv.calendar_id, &mv.event_id, &mv.to, &mv.scope)
                .await;
            (mv, result)
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut outcome = ReschedulePlan {
        moved: Vec::with_capacity(results.len()),
        unresolved,
    };
    for (mv, result) in results {
        match result {
            Ok(()) => {
                info!(
                    provider = provider.name(),
                    event_id = %mv.event_id,
                    to = %mv.to.start,
                    "Moved event"
                );
                outcome.moved.push(mv);
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    event_id = %mv.event_id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Failed to move event"
                );
                outcome.unresolved.push(Unresolved {
                    event_id: mv.event_id,
                    reason: UnresolvedReason::Provider {
                        error: e.kind(),
                        message: e.reason().to_string(),
                    },
                });
            }
        }
    }
    outcome.moved.sort_by_key(|m| m.to.start);
    outcome
}
