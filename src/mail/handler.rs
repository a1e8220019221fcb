//! Email-backed engagement handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::availability::interval::saturating_add;
use crate::availability::{AvailabilityWindow, compute_free_slots};
use crate::calendar::{CalendarProvider, collect_busy};
use crate::config::AssistConfig;
use crate::engagement::{EngagementDecision, EngagementHandler};
use crate::error::Error;
use crate::exchange::{Direction, ExchangeService, InboundMessage};
use crate::mail::templates;
use crate::mail::{Mailer, OutgoingEmail};

/// Turns a scheduling request into the text of a reply.
#[async_trait]
pub trait SchedulingAgent: Send + Sync {
    async fn respond(&self, message: &InboundMessage) -> Result<String, Error>;
}

/// Handler that answers every decision with an email.
///
/// Replies it sends on Onboard and Engage are recorded with the exchange
/// service, so the sender answering them counts as a valid engagement.
pub struct MailingHandler {
    mailer: Arc<dyn Mailer>,
    exchanges: Arc<dyn ExchangeService>,
    agent: Arc<dyn SchedulingAgent>,
    assistant_address: String,
    onboarding_url: String,
}

impl MailingHandler {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        exchanges: Arc<dyn ExchangeService>,
        agent: Arc<dyn SchedulingAgent>,
        assistant_address: impl Into<String>,
        onboarding_url: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            exchanges,
            agent,
            assistant_address: assistant_address.into(),
            onboarding_url: onboarding_url.into(),
        }
    }

    fn reply_to(&self, message: &InboundMessage, body: String) -> OutgoingEmail {
        let domain = self
            .assistant_address
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("schedule-assist");
        OutgoingEmail {
            to: message.sender.clone(),
            subject: templates::reply_subject(&message.subject),
            body,
            message_id: format!("{}@{domain}", Uuid::new_v4()),
            in_reply_to: Some(message.message_id.clone()),
        }
    }

    async fn send_tracked(&self, message: &InboundMessage, body: String) -> Result<(), Error> {
        let email = self.reply_to(message, body);
        self.mailer.send(&email).await?;

        let outbound = InboundMessage {
            message_id: email.message_id.clone(),
            previous_message_id: email.in_reply_to.clone(),
            sender: self.assistant_address.clone(),
            recipients: vec![email.to.clone()],
            subject: email.subject.clone(),
            body: email.body.clone(),
            received_at: Utc::now(),
            direction: Direction::Outbound,
        };
        self.exchanges.record(&outbound).await?;
        Ok(())
    }
}

#[async_trait]
impl EngagementHandler for MailingHandler {
    async fn onboard(&self, message: &InboundMessage) -> Result<(), Error> {
        info!(sender = %message.sender, "Sending onboarding invitation");
        self.send_tracked(message, templates::onboarding(&self.onboarding_url))
            .await
    }

    async fn engage(&self, message: &InboundMessage) -> Result<(), Error> {
        debug!(sender = %message.sender, request = %message.reply_text(), "Answering scheduling request");
        let body = self.agent.respond(message).await?;
        self.send_tracked(message, body).await
    }

    async fn offboard(&self, message: &InboundMessage) -> Result<(), Error> {
        info!(sender = %message.sender, "Replying to untracked thread");
        let email = self.reply_to(message, templates::invalid_thread());
        self.mailer.send(&email).await?;
        Ok(())
    }

    async fn notify_failure(
        &self,
        message: &InboundMessage,
        decision: EngagementDecision,
        _failure: &Error,
    ) -> Result<(), Error> {
        let email = self.reply_to(message, templates::failure_apology(decision));
        self.mailer.send(&email).await?;
        Ok(())
    }
}

/// Agent that answers with the sender's next free slots.
pub struct SlotSuggestionAgent {
    provider: Arc<dyn CalendarProvider>,
    config: AssistConfig,
    max_suggestions: usize,
}

impl SlotSuggestionAgent {
    pub fn new(provider: Arc<dyn CalendarProvider>, config: AssistConfig) -> Self {
        Self {
            provider,
            config,
            max_suggestions: 5,
        }
    }

    /// Suggestions for the window starting at `from`.
    pub async fn suggest(&self, from: DateTime<Utc>) -> Result<String, Error> {
        let window = AvailabilityWindow::new(
            from,
            saturating_add(from, self.config.reschedule_horizon),
            self.config.min_slot_minutes,
            self.config.timezone,
        )?;
        let busy = collect_busy(
            self.provider.as_ref(),
            &self.config.calendar_ids,
            &window.range,
        )
        .await?;
        let slots = compute_free_slots(&window, &busy, self.config.min_slot_minutes)?;
        debug!(slots = slots.len(), "Suggesting free slots");

        if slots.is_empty() {
            return Ok(format!(
                "I couldn't find any free time between {} and {}.",
                describe(&window.range.start, &self.config),
                describe(&window.range.end, &self.config),
            ));
        }

        let lines: Vec<String> = slots
            .iter()
            .take(self.max_suggestions)
            .map(|s| format!("- {}", s.display(&self.config.timezone)))
            .collect();
        Ok(format!("Here are some times that are open:\n\n{}", lines.join("\n")))
    }
}

fn describe(at: &DateTime<Utc>, config: &AssistConfig) -> String {
    at.with_timezone(&config.timezone)
        .format("%a %b %-d, %-I:%M %p")
        .to_string()
}

#[async_trait]
impl SchedulingAgent for SlotSuggestionAgent {
    async fn respond(&self, message: &InboundMessage) -> Result<String, Error> {
        self.suggest(message.received_at).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::availability::{ScheduledEvent, TimeRange};
    use crate::calendar::{EditScope, InMemoryCalendar};
    use crate::error::MailError;
    use crate::exchange::{ExchangeService, InMemoryExchanges};
    use crate::mail::RecordingMailer;

    struct CannedAgent(&'static str);

    #[async_trait]
    impl SchedulingAgent for CannedAgent {
        async fn respond(&self, _message: &InboundMessage) -> Result<String, Error> {
            Ok(self.0.to_string())
        }
    }

    fn message(id: &str, previous: Option<&str>) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            previous_message_id: previous.map(String::from),
            sender: "alice@example.com".into(),
            recipients: vec!["assistant@schedule.example".into()],
            subject: "Coffee".into(),
            body: "Free Tuesday?".into(),
            received_at: Utc::now(),
            direction: Direction::Inbound,
        }
    }

    fn handler(
        mailer: Arc<RecordingMailer>,
        exchanges: Arc<InMemoryExchanges>,
    ) -> MailingHandler {
        MailingHandler::new(
            mailer,
            exchanges,
            Arc::new(CannedAgent("Tuesday 10am works.")),
            "assistant@schedule.example",
            "https://assist.example/connect",
        )
    }

    #[tokio::test]
    async fn onboarding_reply_is_tracked() {
        let mailer = Arc::new(RecordingMailer::new());
        let exchanges = Arc::new(InMemoryExchanges::new());
        let h = handler(mailer.clone(), exchanges.clone());

        let opener = message("m1", None);
        exchanges.record(&opener).await.unwrap();
        h.onboard(&opener).await.unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].subject, "Re: Coffee");
        assert!(sent[0].body.contains("https://assist.example/connect"));
        assert!(sent[0].message_id.ends_with("@schedule.example"));

        let answer = message("m3", Some(&sent[0].message_id));
        assert!(exchanges.assess(&answer).await.unwrap().is_valid_engagement);
    }

    #[tokio::test]
    async fn engage_sends_agent_reply() {
        let mailer = Arc::new(RecordingMailer::new());
        let exchanges = Arc::new(InMemoryExchanges::new());
        let h = handler(mailer.clone(), exchanges.clone());

        let opener = message("m1", None);
        exchanges.record(&opener).await.unwrap();
        h.engage(&opener).await.unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent[0].body, "Tuesday 10am works.");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn offboard_is_not_tracked() {
        let mailer = Arc::new(RecordingMailer::new());
        let exchanges = Arc::new(InMemoryExchanges::new());
        let h = handler(mailer.clone(), exchanges.clone());

        h.offboard(&message("m2", Some("stale"))).await.unwrap();
        assert_eq!(mailer.sent().await.len(), 1);
        assert_eq!(exchanges.exchange_count().await, 0);
    }

    #[tokio::test]
    async fn send_failure_propagates() {
        let mailer = Arc::new(RecordingMailer::new());
        mailer.fail_with(Some("smtp down")).await;
        let h = handler(mailer, Arc::new(InMemoryExchanges::new()));

        let err = h.offboard(&message("m2", Some("x"))).await.unwrap_err();
        assert!(matches!(err, Error::Mail(MailError::SendFailed(_))));
    }

    #[tokio::test]
    async fn slot_agent_lists_free_time() {
        let calendar = Arc::new(InMemoryCalendar::new("memory"));
        let from = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        calendar
            .insert(ScheduledEvent {
                id: "standup".into(),
                calendar_id: "primary".into(),
                range: TimeRange::new(from, from + Duration::hours(1)).unwrap(),
                scope: EditScope::Series,
            })
            .await;

        let config = AssistConfig {
            reschedule_horizon: Duration::hours(3),
            ..AssistConfig::default()
        };
        let agent = SlotSuggestionAgent::new(calendar, config);
        let reply = agent.suggest(from).await.unwrap();
        assert!(reply.contains("Mon Mar 2, 10:00 AM – 12:00 PM (120 min)"), "{reply}");
    }
}
