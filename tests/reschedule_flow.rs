//! Rescheduling against an in-memory calendar, including partial failure.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use schedule_assist::availability::{
    RescheduleOptions, ScheduledEvent, TimeRange, UnresolvedReason, apply_plan, plan_rescheduling,
};
use schedule_assist::calendar::{EditScope, InMemoryCalendar, movable_events};
use schedule_assist::error::{ProviderError, ProviderErrorKind};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

fn event(id: &str, from: (u32, u32), to: (u32, u32)) -> ScheduledEvent {
    ScheduledEvent {
        id: id.into(),
        calendar_id: "primary".into(),
        range: TimeRange::new(at(from.0, from.1), at(to.0, to.1)).unwrap(),
        scope: EditScope::Series,
    }
}

async fn calendar_with(events: &[ScheduledEvent]) -> Arc<InMemoryCalendar> {
    let calendar = Arc::new(InMemoryCalendar::new("memory"));
    for e in events {
        calendar.insert(e.clone()).await;
    }
    calendar
}

fn day() -> TimeRange {
    TimeRange::new(at(0, 0), at(23, 59)).unwrap()
}

#[tokio::test]
async fn boxed_in_event_is_unresolved_and_neighbours_untouched() {
    let events = [
        event("before", (8, 30), (10, 0)),
        event("target", (10, 0), (11, 0)),
        event("after", (11, 0), (12, 30)),
    ];
    let calendar = calendar_with(&events).await;

    let protect = TimeRange::new(at(10, 0), at(11, 0)).unwrap();
    let scheduled = movable_events(calendar.as_ref(), "primary", &day()).await.unwrap();
    let plan = plan_rescheduling(
        &protect,
        &scheduled,
        &RescheduleOptions::with_horizon(Duration::hours(1)),
    )
    .unwrap();

    assert!(plan.moved.is_empty());
    assert_eq!(plan.unresolved.len(), 1);
    assert_eq!(plan.unresolved[0].event_id, "target");
    assert_eq!(
        plan.unresolved[0].reason,
        UnresolvedReason::NoSlotWithinHorizon { horizon_minutes: 60 }
    );

    let applied = apply_plan(calendar.as_ref(), plan, 4).await;
    assert!(!applied.is_complete());
    assert_eq!(calendar.range_of("before").await.unwrap().start, at(8, 30));
    assert_eq!(calendar.range_of("after").await.unwrap().start, at(11, 0));
    assert_eq!(calendar.range_of("target").await.unwrap().start, at(10, 0));
}

#[tokio::test]
async fn provider_failure_becomes_unresolved_entry() {
    let events = [
        event("a", (10, 0), (10, 30)),
        event("b", (10, 30), (11, 0)),
    ];
    let calendar = calendar_with(&events).await;
    calendar
        .fail_updates_for("b", ProviderError::transient("memory", "429 rate limited"))
        .await;

    let protect = TimeRange::new(at(10, 0), at(11, 0)).unwrap();
    let scheduled = movable_events(calendar.as_ref(), "primary", &day()).await.unwrap();
    let plan = plan_rescheduling(
        &protect,
        &scheduled,
        &RescheduleOptions::with_horizon(Duration::hours(3)),
    )
    .unwrap();
    assert_eq!(plan.moved.len(), 2);

    let applied = apply_plan(calendar.as_ref(), plan, 2).await;
    assert_eq!(applied.moved.len(), 1);
    assert_eq!(applied.moved[0].event_id, "a");
    assert_eq!(applied.unresolved.len(), 1);
    assert!(matches!(
        &applied.unresolved[0].reason,
        UnresolvedReason::Provider { error: ProviderErrorKind::Transient, .. }
    ));

    let moved_a = calendar.range_of("a").await.unwrap();
    assert!(!moved_a.overlaps(&protect));
    assert_eq!(calendar.range_of("b").await.unwrap().start, at(10, 30));
}
