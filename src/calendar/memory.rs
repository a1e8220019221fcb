//! In-process calendar provider for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::availability::all_day::EventTime;
use crate::availability::interval::{BusyInterval, TimeRange};
use crate::availability::reschedule::ScheduledEvent;
use crate::calendar::{CalendarEvent, CalendarProvider, EditScope, NewEvent};
use crate::error::ProviderError;

/// Calendar provider backed by a `Vec` behind a lock.
///
/// Failures can be injected per event (updates) or for every call, which is
/// how the partial-failure paths get exercised.
pub struct InMemoryCalendar {
    name: String,
    events: RwLock<Vec<CalendarEvent>>,
    update_failures: RwLock<HashMap<String, ProviderError>>,
    global_failure: RwLock<Option<ProviderError>>,
    update_delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryCalendar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: RwLock::new(Vec::new()),
            update_failures: RwLock::new(HashMap::new()),
            global_failure: RwLock::new(None),
            update_delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make each update take `delay`, so overlapping calls are observable.
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    pub async fn insert_event(&self, event: CalendarEvent) {
        self.events.write().await.push(event);
    }

    /// Insert a timed, non-recurring event in UTC.
    pub async fn insert(&self, event: ScheduledEvent) {
        self.insert_event(CalendarEvent {
            summary: event.id.clone(),
            id: event.id,
            calendar_id: event.calendar_id,
            start: EventTime::Timed(event.range.start),
            end: EventTime::Timed(event.range.end),
            recurring_event_id: None,
            time_zone: "UTC".into(),
        })
        .await;
    }

    pub async fn fail_updates_for(&self, event_id: &str, error: ProviderError) {
        self.update_failures
            .write()
            .await
            .insert(event_id.to_string(), error);
    }

    /// Every subsequent call fails with `error` until cleared with `None`.
    pub async fn fail_all(&self, error: Option<ProviderError>) {
        *self.global_failure.write().await = error;
    }

    /// Current range of an event, if it exists.
    pub async fn range_of(&self, event_id: &str) -> Option<TimeRange> {
        self.events
            .read()
            .await
            .iter()
            .find(|e| e.id == event_id)
            .and_then(|e| e.busy_range().ok())
    }

    /// Timed events on `calendar_id` as planner input, sorted by start.
    pub async fn scheduled(&self, calendar_id: &str) -> Vec<ScheduledEvent> {
        let mut out: Vec<ScheduledEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.calendar_id == calendar_id && !e.is_all_day())
            .filter_map(|e| e.to_scheduled().ok())
            .collect();
        out.sort_by_key(|e| e.range.start);
        out
    }

    /// Highest number of `update_event` calls seen running at once.
    pub fn peak_concurrent_updates(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn check_global(&self) -> Result<(), ProviderError> {
        match self.global_failure.read().await.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn busy_range_of(&self, event: &CalendarEvent) -> Result<TimeRange, ProviderError> {
        event
            .busy_range()
            .map_err(|e| ProviderError::permanent(&self.name, format!("corrupt event {}: {e}", event.id)))
    }

    /// Indices of the events an edit on `target` with `scope` touches.
    fn scoped_indices(
        &self,
        events: &[CalendarEvent],
        target: usize,
        scope: &EditScope,
    ) -> Result<Vec<usize>, ProviderError> {
        let series_id = events[target]
            .recurring_event_id
            .clone()
            .unwrap_or_else(|| events[target].id.clone());
        let in_series = |e: &CalendarEvent| {
            e.id == series_id || e.recurring_event_id.as_deref() == Some(series_id.as_str())
        };

        let mut indices = Vec::new();
        for (i, event) in events.iter().enumerate() {
            let include = match scope {
                EditScope::Instance { .. } => i == target,
                EditScope::Series => in_series(event),
                EditScope::ThisAndFuture { from } => {
                    in_series(event) && self.busy_range_of(event)?.start >= *from
                }
            };
            if include {
                indices.push(i);
            }
        }
        Ok(indices)
    }

    fn find(
        &self,
        events: &[CalendarEvent],
        calendar_id: &str,
        event_id: &str,
    ) -> Result<usize, ProviderError> {
        events
            .iter()
            .position(|e| e.calendar_id == calendar_id && e.id == event_id)
            .ok_or_else(|| {
                ProviderError::permanent(
                    &self.name,
                    format!("event {event_id} not found on calendar {calendar_id}"),
                )
            })
    }
}

#[async_trait]
impl CalendarProvider for InMemoryCalendar {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        self.check_global().await?;
        let events = self.events.read().await;
        let mut out = Vec::new();
        for event in events.iter().filter(|e| e.calendar_id == calendar_id) {
            if self.busy_range_of(event)?.overlaps(range) {
                out.push(event.clone());
            }
        }
        out.sort_by_key(|e| self.busy_range_of(e).map(|r| r.start).ok());
        Ok(out)
    }

    async fn free_busy(
        &self,
        calendar_ids: &[String],
        range: &TimeRange,
    ) -> Result<Vec<BusyInterval>, ProviderError> {
        self.check_global().await?;
        let events = self.events.read().await;
        let mut busy = Vec::new();
        for event in events.iter().filter(|e| calendar_ids.contains(&e.calendar_id)) {
            let event_range = self.busy_range_of(event)?;
            if event_range.overlaps(range) {
                busy.push(BusyInterval {
                    range: event_range,
                    calendar_id: event.calendar_id.clone(),
                });
            }
        }
        Ok(busy)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CalendarEvent, ProviderError> {
        self.check_global().await?;
        let created = CalendarEvent {
            id: Uuid::new_v4().to_string(),
            calendar_id: calendar_id.to_string(),
            summary: event.summary.clone(),
            start: EventTime::Timed(event.range.start),
            end: EventTime::Timed(event.range.end),
            recurring_event_id: None,
            time_zone: "UTC".into(),
        };
        self.events.write().await.push(created.clone());
        Ok(created)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        new_range: &TimeRange,
        scope: &EditScope,
    ) -> Result<(), ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result: Result<(), ProviderError> = async {
            if let Some(delay) = self.update_delay {
                tokio::time::sleep(delay).await;
            }
            self.check_global().await?;
            if let Some(err) = self.update_failures.read().await.get(event_id) {
                return Err(err.clone());
            }

            let mut events = self.events.write().await;
            let target = self.find(&events, calendar_id, event_id)?;
            let delta = new_range.start - self.busy_range_of(&events[target])?.start;
            let length = new_range.duration();

            for i in self.scoped_indices(&events, target, scope)? {
                let start = self.busy_range_of(&events[i])?.start + delta;
                events[i].start = EventTime::Timed(start);
                events[i].end = EventTime::Timed(start + length);
            }
            Ok(())
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        scope: &EditScope,
    ) -> Result<(), ProviderError> {
        self.check_global().await?;
        let mut events = self.events.write().await;
        let target = self.find(&events, calendar_id, event_id)?;
        let doomed = self.scoped_indices(&events, target, scope)?;
        let mut index = 0;
        events.retain(|_| {
            let keep = !doomed.contains(&index);
            index += 1;
            keep
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use super::*;

    fn occurrence(id: &str, day: u32) -> CalendarEvent {
        let start = Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap();
        CalendarEvent {
            id: id.into(),
            calendar_id: "primary".into(),
            summary: "standup".into(),
            start: EventTime::Timed(start),
            end: EventTime::Timed(start + ChronoDuration::minutes(15)),
            recurring_event_id: Some("standup".into()),
            time_zone: "UTC".into(),
        }
    }

    async fn series() -> InMemoryCalendar {
        let cal = InMemoryCalendar::new("memory");
        for day in 2..=4 {
            cal.insert_event(occurrence(&format!("standup_{day}"), day)).await;
        }
        cal
    }

    fn shifted(day: u32, hour: u32) -> TimeRange {
        let start = Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap();
        TimeRange::new(start, start + ChronoDuration::minutes(15)).unwrap()
    }

    #[tokio::test]
    async fn instance_edit_moves_one_occurrence() {
        let cal = series().await;
        let scope = EditScope::Instance {
            occurrence_start: shifted(3, 9).start,
        };
        cal.update_event("primary", "standup_3", &shifted(3, 10), &scope)
            .await
            .unwrap();
        assert_eq!(cal.range_of("standup_3").await, Some(shifted(3, 10)));
        assert_eq!(cal.range_of("standup_2").await, Some(shifted(2, 9)));
        assert_eq!(cal.range_of("standup_4").await, Some(shifted(4, 9)));
    }

    #[tokio::test]
    async fn this_and_future_edit_leaves_earlier_occurrences() {
        let cal = series().await;
        let scope = EditScope::ThisAndFuture {
            from: shifted(3, 9).start,
        };
        cal.update_event("primary", "standup_3", &shifted(3, 11), &scope)
            .await
            .unwrap();
        assert_eq!(cal.range_of("standup_2").await, Some(shifted(2, 9)));
        assert_eq!(cal.range_of("standup_3").await, Some(shifted(3, 11)));
        assert_eq!(cal.range_of("standup_4").await, Some(shifted(4, 11)));
    }

    #[tokio::test]
    async fn series_edit_moves_everything() {
        let cal = series().await;
        cal.update_event("primary", "standup_4", &shifted(4, 8), &EditScope::Series)
            .await
            .unwrap();
        assert_eq!(cal.range_of("standup_2").await, Some(shifted(2, 8)));
        assert_eq!(cal.range_of("standup_4").await, Some(shifted(4, 8)));
    }

    #[tokio::test]
    async fn delete_instance_only() {
        let cal = series().await;
        let scope = EditScope::Instance {
            occurrence_start: shifted(2, 9).start,
        };
        cal.delete_event("primary", "standup_2", &scope).await.unwrap();
        assert_eq!(cal.range_of("standup_2").await, None);
        assert!(cal.range_of("standup_3").await.is_some());
    }

    #[tokio::test]
    async fn global_failure_propagates() {
        let cal = series().await;
        cal.fail_all(Some(ProviderError::permanent("memory", "token revoked")))
            .await;
        let window = TimeRange::new(shifted(2, 0).start, shifted(5, 0).start).unwrap();
        let err = cal.free_busy(&["primary".into()], &window).await.unwrap_err();
        assert!(!err.is_retryable());

        cal.fail_all(None).await;
        let busy = cal.free_busy(&["primary".into()], &window).await.unwrap();
        assert_eq!(busy.len(), 3);
    }

    #[tokio::test]
    async fn unknown_event_is_permanent_error() {
        let cal = series().await;
        let err = cal
            .update_event("primary", "nope", &shifted(2, 10), &EditScope::Series)
            .await
            .unwrap_err();
        assert!(err.reason().contains("not found"));
    }

    #[tokio::test]
    async fn create_then_list() {
        let cal = InMemoryCalendar::new("memory");
        let created = cal
            .create_event(
                "primary",
                &NewEvent {
                    summary: "Focus".into(),
                    description: None,
                    range: shifted(2, 13),
                    attendees: vec![],
                },
            )
            .await
            .unwrap();
        let listed = cal
            .list_events("primary", &TimeRange::new(shifted(2, 0).start, shifted(3, 0).start).unwrap())
            .await
            .unwrap();
        assert_eq!(listed, vec![created]);
    }
}
