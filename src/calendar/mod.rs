//! Calendar backends behind one injected capability.
//!
//! The availability engine and the tools only see `CalendarProvider`, so
//! they run against `InMemoryCalendar` in tests and `GoogleCalendar` in
//! production without knowing which.

pub mod google;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::availability::all_day::{EventTime, resolve_event_range};
use crate::availability::interval::{BusyInterval, TimeRange};
use crate::availability::reschedule::ScheduledEvent;
use crate::error::{AvailabilityError, ProviderError};

pub use google::GoogleCalendar;
pub use memory::InMemoryCalendar;

/// Which part of a (possibly recurring) event an edit applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum EditScope {
    /// One occurrence, identified by its original start.
    Instance { occurrence_start: DateTime<Utc> },
    /// The whole series, or the event itself when it does not recur.
    Series,
    /// Every occurrence starting at or after `from`.
    ThisAndFuture { from: DateTime<Utc> },
}

/// A calendar event as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    /// Set when this is an occurrence of a recurring series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_event_id: Option<String>,
    /// IANA timezone of the owning calendar; anchors all-day events.
    pub time_zone: String,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        matches!(self.start, EventTime::AllDay(_))
    }

    /// The instant range this event blocks.
    pub fn busy_range(&self) -> Result<TimeRange, AvailabilityError> {
        let tz: Tz = self.time_zone.parse().map_err(|_| {
            AvailabilityError::InvalidInput(format!(
                "event {} has unknown timezone {}",
                self.id, self.time_zone
            ))
        })?;
        resolve_event_range(self.start, self.end, &tz)
    }

    /// Edit scope that moves exactly this event and nothing else.
    pub fn own_scope(&self) -> Result<EditScope, AvailabilityError> {
        Ok(match self.recurring_event_id {
            Some(_) => EditScope::Instance {
                occurrence_start: self.busy_range()?.start,
            },
            None => EditScope::Series,
        })
    }

    pub fn to_scheduled(&self) -> Result<ScheduledEvent, AvailabilityError> {
        Ok(ScheduledEvent {
            id: self.id.clone(),
            calendar_id: self.calendar_id.clone(),
            range: self.busy_range()?,
            scope: self.own_scope()?,
        })
    }
}

/// Input for creating an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub range: TimeRange,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
}

/// Authenticated calendar read/write operations for one user.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Provider name for logs and errors (e.g. "google").
    fn name(&self) -> &str;

    /// Events overlapping `range`, recurring series expanded to occurrences.
    async fn list_events(
        &self,
        calendar_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;

    /// Busy intervals for each calendar within `range`.
    async fn free_busy(
        &self,
        calendar_ids: &[String],
        range: &TimeRange,
    ) -> Result<Vec<BusyInterval>, ProviderError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CalendarEvent, ProviderError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        new_range: &TimeRange,
        scope: &EditScope,
    ) -> Result<(), ProviderError>;

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        scope: &EditScope,
    ) -> Result<(), ProviderError>;
}

/// Busy time across several calendars.
///
/// Intervals are concatenated as reported. The same meeting on two calendars
/// counts twice, which can only shrink availability.
pub async fn collect_busy(
    provider: &dyn CalendarProvider,
    calendar_ids: &[String],
    range: &TimeRange,
) -> Result<Vec<BusyInterval>, ProviderError> {
    let busy = provider.free_busy(calendar_ids, range).await?;
    debug!(
        provider = provider.name(),
        calendars = calendar_ids.len(),
        intervals = busy.len(),
        "Collected busy intervals"
    );
    Ok(busy)
}

/// Events on `calendar_id` in `range`, ready for the rescheduling planner.
///
/// All-day events are skipped: moving them is never what the user asked for.
pub async fn movable_events(
    provider: &dyn CalendarProvider,
    calendar_id: &str,
    range: &TimeRange,
) -> Result<Vec<ScheduledEvent>, crate::error::Error> {
    let events = provider.list_events(calendar_id, range).await?;
    Ok(split_for_planning(&events)?.movable)
}

/// Planner input for one calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescheduleInputs {
    /// Timed events on the calendar being rescheduled.
    pub movable: Vec<ScheduledEvent>,
    /// Busy time that stays put: that calendar's all-day events and
    /// everything on the other consulted calendars.
    pub pinned: Vec<TimeRange>,
}

/// Gather everything the planner needs to move events on `calendar_id`
/// without landing them on busy time from any calendar in `consulted`.
pub async fn reschedule_inputs(
    provider: &dyn CalendarProvider,
    calendar_id: &str,
    consulted: &[String],
    range: &TimeRange,
) -> Result<RescheduleInputs, crate::error::Error> {
    let events = provider.list_events(calendar_id, range).await?;
    let mut inputs = split_for_planning(&events)?;

    // The calendar being edited is covered by its own event list.
    let others: Vec<String> = consulted
        .iter()
        .filter(|id| id.as_str() != calendar_id)
        .cloned()
        .collect();
    if !others.is_empty() {
        let busy = collect_busy(provider, &others, range).await?;
        inputs.pinned.extend(busy.into_iter().map(|b| b.range));
    }

    debug!(
        provider = provider.name(),
        calendar_id,
        movable = inputs.movable.len(),
        pinned = inputs.pinned.len(),
        "Gathered reschedule inputs"
    );
    Ok(inputs)
}

fn split_for_planning(events: &[CalendarEvent]) -> Result<RescheduleInputs, AvailabilityError> {
    let mut inputs = RescheduleInputs::default();
    for event in events {
        if event.is_all_day() {
            inputs.pinned.push(event.busy_range()?);
        } else {
            inputs.movable.push(event.to_scheduled()?);
        }
    }
    Ok(inputs)
}
