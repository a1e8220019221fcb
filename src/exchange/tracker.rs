//! Exchange tracking: which replies continue a conversation we know about.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::exchange::message::InboundMessage;

/// Thread-position facts about one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeFacts {
    pub is_thread_opener: bool,
    /// Meaningful for replies only; always `false` for openers.
    pub is_valid_engagement: bool,
}

/// Inspects message linkage and tracks exchanges.
#[async_trait]
pub trait ExchangeService: Send + Sync {
    async fn assess(&self, message: &InboundMessage) -> Result<ExchangeFacts, ExchangeError>;

    /// Remember `message` as part of its exchange. Openers start a new one.
    async fn record(&self, message: &InboundMessage) -> Result<(), ExchangeError>;
}

#[derive(Debug)]
struct Exchange {
    participants: HashSet<String>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashMap<Uuid, Exchange>,
    by_message: HashMap<String, Uuid>,
}

/// Exchange tracker held in memory.
///
/// A reply is a valid engagement when the message it answers belongs to a
/// tracked exchange, its sender already takes part in that exchange, and
/// (if a staleness limit is set) the exchange saw activity recently enough.
#[derive(Debug, Default)]
pub struct InMemoryExchanges {
    state: RwLock<State>,
    stale_after: Option<Duration>,
}

impl InMemoryExchanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies arriving more than `limit` after the last activity are stray.
    pub fn with_staleness(mut self, limit: Duration) -> Self {
        self.stale_after = Some(limit);
        self
    }

    pub async fn exchange_count(&self) -> usize {
        self.state.read().await.exchanges.len()
    }

    fn participants_of(message: &InboundMessage) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&message.sender)
            .chain(message.recipients.iter())
            .map(|a| a.to_lowercase())
    }
}

#[async_trait]
impl ExchangeService for InMemoryExchanges {
    async fn assess(&self, message: &InboundMessage) -> Result<ExchangeFacts, ExchangeError> {
        let Some(previous) = message.previous_message_id.as_deref() else {
            return Ok(ExchangeFacts {
                is_thread_opener: true,
                is_valid_engagement: false,
            });
        };

        let state = self.state.read().await;
        let valid = state
            .by_message
            .get(previous)
            .and_then(|id| state.exchanges.get(id))
            .is_some_and(|exchange| {
                let participant = exchange
                    .participants
                    .contains(&message.sender.to_lowercase());
                let fresh = self.stale_after.is_none_or(|limit| {
                    message.received_at - exchange.last_activity <= limit
                });
                participant && fresh
            });

        debug!(
            message_id = %message.message_id,
            previous = %previous,
            valid,
            "Assessed reply"
        );

        Ok(ExchangeFacts {
            is_thread_opener: false,
            is_valid_engagement: valid,
        })
    }

    async fn record(&self, message: &InboundMessage) -> Result<(), ExchangeError> {
        if message.message_id.trim().is_empty() {
            return Err(ExchangeError::InvalidInput("message id is empty".into()));
        }

        let mut state = self.state.write().await;
        let existing = message
            .previous_message_id
            .as_deref()
            .and_then(|prev| state.by_message.get(prev).copied());

        let exchange_id = match existing {
            Some(id) => id,
            None if message.is_thread_opener() => {
                let id = Uuid::new_v4();
                state.exchanges.insert(
                    id,
                    Exchange {
                        participants: HashSet::new(),
                        last_activity: message.received_at,
                    },
                );
                id
            }
            None => {
                return Err(ExchangeError::InvalidInput(format!(
                    "message {} replies to an untracked exchange",
                    message.message_id
                )));
            }
        };

        if let Some(exchange) = state.exchanges.get_mut(&exchange_id) {
            exchange.participants.extend(Self::participants_of(message));
            exchange.last_activity = exchange.last_activity.max(message.received_at);
        }
        state
            .by_message
            .insert(message.message_id.clone(), exchange_id);
        Ok(())
    }
}
