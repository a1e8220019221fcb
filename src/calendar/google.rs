//! Google Calendar REST provider.
//!
//! Speaks the v3 API directly with reqwest. Failures are classified into
//! transient vs permanent; nothing here retries.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Method, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::availability::all_day::EventTime;
use crate::availability::interval::{BusyInterval, TimeRange};
use crate::calendar::{CalendarEvent, CalendarProvider, EditScope, NewEvent};
use crate::config::GoogleCalendarConfig;
use crate::error::ProviderError;

const PROVIDER: &str = "google";

/// Error reasons Google reports under 403 that really mean "slow down".
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

pub struct GoogleCalendar {
    config: GoogleCalendarConfig,
    client: reqwest::Client,
}

impl GoogleCalendar {
    pub fn new(config: GoogleCalendarConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.api_base).map_err(|e| {
            ProviderError::permanent(PROVIDER, format!("bad API base {}: {e}", self.config.api_base))
        })?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::permanent(PROVIDER, "API base cannot take a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        debug!(%method, path = url.path(), "Calendar API request");
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(self.config.access_token.expose_secret())
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let value: serde_json::Value = response.json().await.map_err(transport_error)?;
        Ok(Some(value))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ProviderError> {
        let value = self
            .send(method, url, query, body)
            .await?
            .ok_or_else(|| ProviderError::permanent(PROVIDER, "empty response body"))?;
        serde_json::from_value(value)
            .map_err(|e| ProviderError::permanent(PROVIDER, format!("unexpected response: {e}")))
    }

    async fn calendar_time_zone(&self, calendar_id: &str) -> Result<String, ProviderError> {
        let url = self.url(&["calendars", calendar_id])?;
        let calendar: GoogleCalendarResource = self.send_json(Method::GET, url, &[], None).await?;
        Ok(calendar.time_zone.unwrap_or_else(|| "UTC".into()))
    }

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<GoogleEvent, ProviderError> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        self.send_json(Method::GET, url, &[], None).await
    }

    async fn patch_times(
        &self,
        calendar_id: &str,
        event_id: &str,
        range: &TimeRange,
    ) -> Result<(), ProviderError> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let body = json!({
            "start": { "dateTime": range.start.to_rfc3339() },
            "end": { "dateTime": range.end.to_rfc3339() },
        });
        self.send(Method::PATCH, url, &[], Some(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", range.start.to_rfc3339()),
                ("timeMax", range.end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let page: EventsPage = self
                .send_json(Method::GET, url.clone(), &query, None)
                .await?;
            let time_zone = page.time_zone.unwrap_or_else(|| "UTC".into());
            for item in page.items {
                if item.status.as_deref() == Some("cancelled") {
                    continue;
                }
                events.push(item.into_event(calendar_id, &time_zone)?);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(calendar_id, count = events.len(), "Listed events");
        Ok(events)
    }

    async fn free_busy(
        &self,
        calendar_ids: &[String],
        range: &TimeRange,
    ) -> Result<Vec<BusyInterval>, ProviderError> {
        let url = self.url(&["freeBusy"])?;
        let body = json!({
            "timeMin": range.start.to_rfc3339(),
            "timeMax": range.end.to_rfc3339(),
            "items": calendar_ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
        });
        let response: FreeBusyResponse = self
            .send_json(Method::POST, url, &[], Some(body))
            .await?;
        flatten_free_busy(response, calendar_ids)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CalendarEvent, ProviderError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let body = json!({
            "summary": event.summary,
            "description": event.description,
            "start": { "dateTime": event.range.start.to_rfc3339() },
            "end": { "dateTime": event.range.end.to_rfc3339() },
            "attendees": event.attendees.iter().map(|a| json!({ "email": a })).collect::<Vec<_>>(),
        });
        let created: GoogleEvent = self
            .send_json(Method::POST, url, &[], Some(body))
            .await?;
        let time_zone = self.calendar_time_zone(calendar_id).await?;
        created.into_event(calendar_id, &time_zone)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        new_range: &TimeRange,
        scope: &EditScope,
    ) -> Result<(), ProviderError> {
        match scope {
            EditScope::Instance { occurrence_start } => {
                let instance_id = instance_event_id(event_id, *occurrence_start);
                self.patch_times(calendar_id, &instance_id, new_range).await
            }
            EditScope::Series => {
                let Some((series_id, occurrence_start)) = split_instance_id(event_id) else {
                    return self.patch_times(calendar_id, event_id, new_range).await;
                };
                // Shift the series master by the same offset the addressed
                // occurrence is moving.
                let delta = new_range.start - occurrence_start;
                let master = self.get_event(calendar_id, series_id).await?;
                let master_start = master.start.instant().ok_or_else(|| {
                    ProviderError::permanent(PROVIDER, "all-day series cannot be moved to a time")
                })?;
                let start = master_start + delta;
                let shifted = TimeRange {
                    start,
                    end: start + new_range.duration(),
                };
                self.patch_times(calendar_id, series_id, &shifted).await
            }
            EditScope::ThisAndFuture { .. } => Err(ProviderError::permanent(
                PROVIDER,
                "this-and-following edits need a series split; edit the series or a single instance",
            )),
        }
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        scope: &EditScope,
    ) -> Result<(), ProviderError> {
        let target = match scope {
            EditScope::Instance { occurrence_start } => instance_event_id(event_id, *occurrence_start),
            EditScope::Series => split_instance_id(event_id)
                .map(|(series, _)| series.to_string())
                .unwrap_or_else(|| event_id.to_string()),
            EditScope::ThisAndFuture { .. } => {
                return Err(ProviderError::permanent(
                    PROVIDER,
                    "this-and-following deletes need a series split",
                ));
            }
        };
        let url = self.url(&["calendars", calendar_id, "events", &target])?;
        self.send(Method::DELETE, url, &[], None).await?;
        Ok(())
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCalendarResource {
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    time_zone: Option<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    summary: Option<String>,
    status: Option<String>,
    start: GoogleTime,
    end: GoogleTime,
    recurring_event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTime {
    date_time: Option<DateTime<Utc>>,
    date: Option<NaiveDate>,
    time_zone: Option<String>,
}

impl GoogleTime {
    fn instant(&self) -> Option<DateTime<Utc>> {
        self.date_time
    }

    fn to_event_time(&self) -> Result<EventTime, ProviderError> {
        match (self.date_time, self.date) {
            (Some(dt), _) => Ok(EventTime::Timed(dt)),
            (None, Some(d)) => Ok(EventTime::AllDay(d)),
            (None, None) => Err(ProviderError::permanent(
                PROVIDER,
                "event time has neither dateTime nor date",
            )),
        }
    }
}

impl GoogleEvent {
    fn into_event(self, calendar_id: &str, calendar_tz: &str) -> Result<CalendarEvent, ProviderError> {
        let time_zone = self
            .start
            .time_zone
            .clone()
            .unwrap_or_else(|| calendar_tz.to_string());
        Ok(CalendarEvent {
            start: self.start.to_event_time()?,
            end: self.end.to_event_time()?,
            id: self.id,
            calendar_id: calendar_id.to_string(),
            summary: self.summary.unwrap_or_else(|| "(no title)".into()),
            recurring_event_id: self.recurring_event_id,
            time_zone,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: std::collections::HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<FreeBusyPeriod>,
    #[serde(default)]
    errors: Vec<FreeBusyIssue>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyIssue {
    reason: String,
}

/// Busy periods in request order. A per-calendar error fails the whole call:
/// silently missing a calendar would overstate availability.
fn flatten_free_busy(
    response: FreeBusyResponse,
    calendar_ids: &[String],
) -> Result<Vec<BusyInterval>, ProviderError> {
    let mut busy = Vec::new();
    for id in calendar_ids {
        let Some(calendar) = response.calendars.get(id) else {
            return Err(ProviderError::permanent(
                PROVIDER,
                format!("calendar {id} missing from freeBusy response"),
            ));
        };
        if let Some(issue) = calendar.errors.first() {
            let err = if RATE_LIMIT_REASONS.contains(&issue.reason.as_str())
                || issue.reason == "backendError"
            {
                ProviderError::transient(PROVIDER, format!("calendar {id}: {}", issue.reason))
            } else {
                ProviderError::permanent(PROVIDER, format!("calendar {id}: {}", issue.reason))
            };
            return Err(err);
        }
        busy.extend(calendar.busy.iter().map(|p| BusyInterval {
            range: TimeRange {
                start: p.start,
                end: p.end,
            },
            calendar_id: id.clone(),
        }));
    }
    Ok(busy)
}

// ── Error classification ────────────────────────────────────────────

/// Map a non-success HTTP status to a provider failure.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED => {
            ProviderError::permanent(PROVIDER, format!("authorization expired, reconnect calendar ({detail})"))
        }
        StatusCode::FORBIDDEN if RATE_LIMIT_REASONS.iter().any(|r| body.contains(r)) => {
            ProviderError::transient(PROVIDER, detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ProviderError::transient(PROVIDER, detail)
        }
        s if s.is_server_error() => ProviderError::transient(PROVIDER, detail),
        _ => ProviderError::permanent(PROVIDER, detail),
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::permanent(PROVIDER, format!("undecodable response: {err}"))
    } else {
        ProviderError::transient(PROVIDER, format!("request failed: {err}"))
    }
}

// ── Recurring instance ids ──────────────────────────────────────────

const INSTANCE_SUFFIX_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Google names occurrences `{seriesId}_{YYYYMMDDTHHMMSSZ}`.
fn instance_event_id(event_id: &str, occurrence_start: DateTime<Utc>) -> String {
    let suffix = occurrence_start.format(INSTANCE_SUFFIX_FORMAT).to_string();
    if event_id.ends_with(&format!("_{suffix}")) {
        event_id.to_string()
    } else {
        let base = split_instance_id(event_id).map_or(event_id, |(series, _)| series);
        format!("{base}_{suffix}")
    }
}

/// Split an occurrence id into series id and original start.
fn split_instance_id(event_id: &str) -> Option<(&str, DateTime<Utc>)> {
    let (series, suffix) = event_id.rsplit_once('_')?;
    let naive = chrono::NaiveDateTime::parse_from_str(suffix, INSTANCE_SUFFIX_FORMAT).ok()?;
    Some((series, naive.and_utc()))
}
