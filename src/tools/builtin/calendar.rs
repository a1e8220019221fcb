//! Calendar tools for availability and rescheduling.
//!
//! All tools take RFC 3339 timestamps and work in UTC. Human-readable
//! output uses the configured reporting timezone.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::availability::{
    AvailabilityWindow, RescheduleOptions, TimeRange, apply_plan, compute_free_slots,
    is_range_free, plan_rescheduling_around,
};
use crate::calendar::{CalendarProvider, collect_busy, movable_events, reschedule_inputs};
use crate::config::AssistConfig;
use crate::error::{AvailabilityError, Error, ProviderError};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput, require_time};

/// Register every calendar tool against `provider`.
pub async fn register_calendar_tools(
    registry: &ToolRegistry,
    provider: Arc<dyn CalendarProvider>,
    config: AssistConfig,
) {
    let shared = Arc::new(CalendarToolState { provider, config });
    registry
        .register(Arc::new(CheckAvailabilityTool(shared.clone())))
        .await;
    registry
        .register(Arc::new(FindFreeSlotsTool(shared.clone())))
        .await;
    registry
        .register(Arc::new(RescheduleToFreeTool(shared.clone())))
        .await;
    registry.register(Arc::new(ListEventsTool(shared))).await;
}

pub struct CalendarToolState {
    provider: Arc<dyn CalendarProvider>,
    config: AssistConfig,
}

impl CalendarToolState {
    fn calendar_ids(&self, params: &serde_json::Value) -> Vec<String> {
        match params.get("calendar_ids").and_then(|v| v.as_array()) {
            Some(ids) if !ids.is_empty() => ids
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => self.config.calendar_ids.clone(),
        }
    }

    fn calendar_id(&self, params: &serde_json::Value) -> String {
        params
            .get("calendar_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| self.config.calendar_ids.first().cloned())
            .unwrap_or_else(|| "primary".to_string())
    }
}

fn range_param(tool: &str, params: &serde_json::Value) -> Result<TimeRange, ToolError> {
    let start = require_time(tool, params, "start")?;
    let end = require_time(tool, params, "end")?;
    TimeRange::new(start, end).map_err(|e| invalid(tool, e))
}

fn invalid(tool: &str, e: AvailabilityError) -> ToolError {
    ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: e.to_string(),
    }
}

fn provider_failure(tool: &str, e: ProviderError) -> ToolError {
    ToolError::Provider {
        name: tool.to_string(),
        source: e,
    }
}

fn from_crate_error(tool: &str, e: Error) -> ToolError {
    match e {
        Error::Provider(p) => provider_failure(tool, p),
        Error::Availability(a) => invalid(tool, a),
        other => ToolError::ExecutionFailed {
            name: tool.to_string(),
            reason: other.to_string(),
        },
    }
}

fn range_schema(extra: serde_json::Value) -> serde_json::Value {
    let mut properties = json!({
        "start": {
            "type": "string",
            "description": "Range start, RFC 3339 (e.g. 2026-03-02T09:00:00Z)"
        },
        "end": {
            "type": "string",
            "description": "Range end (exclusive), RFC 3339"
        }
    });
    if let (Some(props), Some(more)) = (properties.as_object_mut(), extra.as_object()) {
        props.extend(more.clone());
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["start", "end"]
    })
}

fn calendar_ids_schema() -> serde_json::Value {
    json!({
        "calendar_ids": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Calendars to consult (default: configured calendars)"
        }
    })
}

/// Is a given range completely free?
pub struct CheckAvailabilityTool(Arc<CalendarToolState>);

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn description(&self) -> &str {
        "Check whether the user is free for the whole of a time range. \
         Returns free=true/false and any busy intervals that overlap the range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        range_schema(calendar_ids_schema())
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let range = range_param(self.name(), &params)?;
        let ids = self.0.calendar_ids(&params);

        let busy = collect_busy(self.0.provider.as_ref(), &ids, &range)
            .await
            .map_err(|e| provider_failure(self.name(), e))?;
        let free = is_range_free(&range, &busy).map_err(|e| invalid(self.name(), e))?;

        let conflicts: Vec<_> = busy.iter().filter(|b| b.range.overlaps(&range)).collect();
        Ok(ToolOutput::success(
            json!({ "free": free, "conflicts": conflicts }),
            start.elapsed(),
        ))
    }
}

/// Free slots of a minimum length inside a window.
pub struct FindFreeSlotsTool(Arc<CalendarToolState>);

#[async_trait]
impl Tool for FindFreeSlotsTool {
    fn name(&self) -> &str {
        "find_free_slots"
    }

    fn description(&self) -> &str {
        "Find free time slots of at least a minimum length within a window, \
         across the user's calendars. Slots are returned in chronological order \
         with a human-readable rendering in the user's timezone."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let mut extra = calendar_ids_schema();
        if let Some(obj) = extra.as_object_mut() {
            obj.insert(
                "min_minutes".into(),
                json!({
                    "type": "integer",
                    "description": "Minimum slot length in minutes (default: configured minimum)"
                }),
            );
        }
        range_schema(extra)
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let range = range_param(self.name(), &params)?;
        let min_minutes = match params.get("min_minutes") {
            None => self.0.config.min_slot_minutes,
            Some(v) => v
                .as_u64()
                .and_then(|m| u32::try_from(m).ok())
                .ok_or_else(|| ToolError::InvalidParameters {
                    name: self.name().to_string(),
                    reason: "'min_minutes' must be a non-negative integer".into(),
                })?,
        };

        let tz = self.0.config.timezone;
        let window = AvailabilityWindow {
            range,
            min_duration: chrono::Duration::zero(),
            timezone: tz,
        };
        let ids = self.0.calendar_ids(&params);
        let busy = collect_busy(self.0.provider.as_ref(), &ids, &range)
            .await
            .map_err(|e| provider_failure(self.name(), e))?;
        let slots = compute_free_slots(&window, &busy, min_minutes)
            .map_err(|e| invalid(self.name(), e))?;

        let rendered: Vec<_> = slots
            .iter()
            .map(|s| {
                json!({
                    "start": s.range.start,
                    "end": s.range.end,
                    "minutes": s.duration().num_minutes(),
                    "display": s.display(&tz),
                })
            })
            .collect();

        Ok(ToolOutput::success(
            json!({ "timezone": tz.name(), "slots": rendered }),
            start.elapsed(),
        ))
    }
}

/// Move conflicting events out of a range.
pub struct RescheduleToFreeTool(Arc<CalendarToolState>);

#[async_trait]
impl Tool for RescheduleToFreeTool {
    fn name(&self) -> &str {
        "reschedule_to_free"
    }

    fn description(&self) -> &str {
        "Free up a time range by moving every event that overlaps it to the \
         nearest open time within the configured horizon. Reports which events \
         moved and which could not be moved. Set dry_run to only plan."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        range_schema(json!({
            "calendar_id": {
                "type": "string",
                "description": "Calendar whose events may be moved (default: first configured)"
            },
            "dry_run": {
                "type": "boolean",
                "description": "Plan the moves without touching the calendar (default: false)"
            }
        }))
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let protect = range_param(self.name(), &params)?;
        let calendar_id = self.0.calendar_id(&params);
        let dry_run = params
            .get("dry_run")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let provider = self.0.provider.as_ref();
        let horizon = self.0.config.reschedule_horizon;

        // A moved event can end up to `horizon` plus its own length away from
        // the range, so the longest conflict sets how far out to look.
        let conflicts = movable_events(provider, &calendar_id, &protect)
            .await
            .map_err(|e| from_crate_error(self.name(), e))?;
        let longest = conflicts
            .iter()
            .map(|e| e.range.duration())
            .fold(protect.duration(), |longest, d| longest.max(d));
        let pad = horizon.checked_add(&longest).unwrap_or(chrono::Duration::MAX);
        let search = protect.padded(pad);

        let inputs = reschedule_inputs(provider, &calendar_id, &self.0.config.calendar_ids, &search)
            .await
            .map_err(|e| from_crate_error(self.name(), e))?;

        let options = RescheduleOptions {
            horizon,
            not_before: Some(ctx.now),
        };
        let plan = plan_rescheduling_around(&protect, &inputs.movable, &inputs.pinned, &options)
            .map_err(|e| invalid(self.name(), e))?;

        let outcome = if dry_run {
            plan
        } else {
            apply_plan(provider, plan, self.0.config.max_concurrent_updates).await
        };

        let tz = self.0.config.timezone;
        let moved: Vec<_> = outcome
            .moved
            .iter()
            .map(|m| {
                json!({
                    "event_id": m.event_id,
                    "from": m.from,
                    "to": m.to,
                    "display": m.to.start.with_timezone(&tz).format("%a %b %-d, %-I:%M %p").to_string(),
                })
            })
            .collect();
        let unresolved: Vec<_> = outcome
            .unresolved
            .iter()
            .map(|u| {
                json!({
                    "event_id": u.event_id,
                    "reason": u.reason,
                    "message": u.reason.to_string(),
                })
            })
            .collect();

        Ok(ToolOutput::success(
            json!({
                "dry_run": dry_run,
                "complete": outcome.is_complete(),
                "moved": moved,
                "unresolved": unresolved,
            }),
            start.elapsed(),
        ))
    }
}

/// Events on one calendar in a range.
pub struct ListEventsTool(Arc<CalendarToolState>);

#[async_trait]
impl Tool for ListEventsTool {
    fn name(&self) -> &str {
        "list_events"
    }

    fn description(&self) -> &str {
        "List events on a calendar that overlap a time range. \
         Recurring events are expanded into individual occurrences."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        range_schema(json!({
            "calendar_id": {
                "type": "string",
                "description": "Calendar to read (default: first configured)"
            }
        }))
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let range = range_param(self.name(), &params)?;
        let calendar_id = self.0.calendar_id(&params);

        let events = self
            .0
            .provider
            .list_events(&calendar_id, &range)
            .await
            .map_err(|e| provider_failure(self.name(), e))?;

        Ok(ToolOutput::success(
            json!({ "calendar_id": calendar_id, "events": events }),
            start.elapsed(),
        ))
    }
}
