//! Classify an inbound message and run the matching handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::engagement::{EngagementDecision, EngagementFacts};
use crate::error::{EngagementError, Error};
use crate::exchange::{Direction, ExchangeService, InboundMessage, UserDirectory};

/// Side effects for each decision.
#[async_trait]
pub trait EngagementHandler: Send + Sync {
    async fn onboard(&self, message: &InboundMessage) -> Result<(), Error>;
    async fn engage(&self, message: &InboundMessage) -> Result<(), Error>;
    async fn offboard(&self, message: &InboundMessage) -> Result<(), Error>;

    /// Best-effort apology after one of the above failed.
    async fn notify_failure(
        &self,
        message: &InboundMessage,
        decision: EngagementDecision,
        failure: &Error,
    ) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Handled,
    /// The handler failed and the sender was told.
    FailureNotified { reason: String },
    /// The handler failed and so did the notification.
    FailureUnreported { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub message_id: String,
    pub decision: EngagementDecision,
    #[serde(flatten)]
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    pub fn handled(&self) -> bool {
        self.status == DispatchStatus::Handled
    }
}

pub struct EngagementDispatcher {
    directory: Arc<dyn UserDirectory>,
    exchanges: Arc<dyn ExchangeService>,
    handler: Arc<dyn EngagementHandler>,
}

impl EngagementDispatcher {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        exchanges: Arc<dyn ExchangeService>,
        handler: Arc<dyn EngagementHandler>,
    ) -> Self {
        Self {
            directory,
            exchanges,
            handler,
        }
    }

    /// Look up the three facts for `message`.
    pub async fn facts_for(&self, message: &InboundMessage) -> Result<EngagementFacts, EngagementError> {
        let lookup_failed = |reason: String| EngagementError::FactLookup {
            sender: message.sender.clone(),
            reason,
        };

        let known_user = self
            .directory
            .is_known(&message.sender)
            .await
            .map_err(|e| lookup_failed(e.to_string()))?;
        let thread = self
            .exchanges
            .assess(message)
            .await
            .map_err(|e| lookup_failed(e.to_string()))?;

        Ok(EngagementFacts {
            known_user,
            is_thread_opener: thread.is_thread_opener,
            is_valid_engagement: thread.is_valid_engagement,
        })
    }

    /// Classify `message` and run the handler for the decision.
    ///
    /// Only fact-gathering problems surface as errors. Handler failures are
    /// reported through `notify_failure` and show up in the outcome status.
    pub async fn process(&self, message: &InboundMessage) -> Result<DispatchOutcome, EngagementError> {
        if message.direction == Direction::Outbound {
            return Err(EngagementError::InvalidInput(format!(
                "message {} is outbound and is not classified",
                message.message_id
            )));
        }

        let facts = self.facts_for(message).await?;
        let decision = facts.decide();

        info!(
            message_id = %message.message_id,
            sender = %message.sender,
            known_user = facts.known_user,
            is_thread_opener = facts.is_thread_opener,
            is_valid_engagement = facts.is_valid_engagement,
            decision = %decision,
            "Classified inbound email"
        );

        // Tracked before handling so replies sent by the handler chain onto it.
        if decision != EngagementDecision::Offboard
            && let Err(e) = self.exchanges.record(message).await
        {
            warn!(message_id = %message.message_id, error = %e, "Failed to record message in exchange");
        }

        let result = match decision {
            EngagementDecision::Onboard => self.handler.onboard(message).await,
            EngagementDecision::Engage => self.handler.engage(message).await,
            EngagementDecision::Offboard => self.handler.offboard(message).await,
        };

        let status = match result {
            Ok(()) => DispatchStatus::Handled,
            Err(failure) => {
                warn!(
                    message_id = %message.message_id,
                    decision = %decision,
                    error = %failure,
                    "Engagement handler failed, notifying sender"
                );
                let reason = failure.to_string();
                match self.handler.notify_failure(message, decision, &failure).await {
                    Ok(()) => DispatchStatus::FailureNotified { reason },
                    Err(notify_err) => {
                        error!(
                            message_id = %message.message_id,
                            error = %notify_err,
                            "Failure notification also failed"
                        );
                        DispatchStatus::FailureUnreported { reason }
                    }
                }
            }
        };

        Ok(DispatchOutcome {
            message_id: message.message_id.clone(),
            decision,
            status,
        })
    }
}
