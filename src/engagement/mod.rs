//! Engagement classification: what to do with an inbound email.
//!
//! Three facts decide the outcome:
//!
//! | known user | opens thread | valid engagement | decision |
//! |-----------|--------------|------------------|----------|
//! | no        | yes          | any              | onboard  |
//! | yes       | yes          | any              | engage   |
//! | any       | no           | yes              | engage   |
//! | any       | no           | no               | offboard |

pub mod dispatch;

pub use dispatch::{DispatchOutcome, DispatchStatus, EngagementDispatcher, EngagementHandler};

use serde::{Deserialize, Serialize};

use crate::error::EngagementError;

/// Outcome of classifying one message. Derived per message, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementDecision {
    /// Invite an unknown sender to connect a calendar.
    Onboard,
    /// Hand the message to the scheduling agent.
    Engage,
    /// Tell the sender their reply can't be acted on.
    Offboard,
}

impl EngagementDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Onboard => "onboard",
            Self::Engage => "engage",
            Self::Offboard => "offboard",
        }
    }
}

impl std::fmt::Display for EngagementDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The three facts, all known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementFacts {
    pub known_user: bool,
    pub is_thread_opener: bool,
    pub is_valid_engagement: bool,
}

impl EngagementFacts {
    pub fn decide(&self) -> EngagementDecision {
        match (self.is_thread_opener, self.known_user, self.is_valid_engagement) {
            (true, false, _) => EngagementDecision::Onboard,
            (true, true, _) => EngagementDecision::Engage,
            (false, _, true) => EngagementDecision::Engage,
            (false, _, false) => EngagementDecision::Offboard,
        }
    }
}

/// Facts as they arrive from collaborators, possibly incomplete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFacts {
    pub known_user: Option<bool>,
    pub is_thread_opener: Option<bool>,
    pub is_valid_engagement: Option<bool>,
}

impl TryFrom<PartialFacts> for EngagementFacts {
    type Error = EngagementError;

    fn try_from(p: PartialFacts) -> Result<Self, Self::Error> {
        let missing = |name: &str| EngagementError::InvalidInput(format!("{name} is undefined"));
        Ok(Self {
            known_user: p.known_user.ok_or_else(|| missing("known_user"))?,
            is_thread_opener: p.is_thread_opener.ok_or_else(|| missing("is_thread_opener"))?,
            is_valid_engagement: p
                .is_valid_engagement
                .ok_or_else(|| missing("is_valid_engagement"))?,
        })
    }
}

/// Classify a message from its three facts.
///
/// Every fact must be present, even `is_valid_engagement` for thread
/// openers where it does not affect the result.
pub fn classify_engagement(
    known_user: Option<bool>,
    is_thread_opener: Option<bool>,
    is_valid_engagement: Option<bool>,
) -> Result<EngagementDecision, EngagementError> {
    let facts = EngagementFacts::try_from(PartialFacts {
        known_user,
        is_thread_opener,
        is_valid_engagement,
    })?;
    Ok(facts.decide())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_eight_combinations() {
        use EngagementDecision::*;
        let table = [
            ((false, true, false), Onboard),
            ((false, true, true), Onboard),
            ((false, false, true), Engage),
            ((false, false, false), Offboard),
            ((true, true, false), Engage),
            ((true, true, true), Engage),
            ((true, false, true), Engage),
            ((true, false, false), Offboard),
        ];
        for ((known, opener, valid), expected) in table {
            let got = classify_engagement(Some(known), Some(opener), Some(valid)).unwrap();
            assert_eq!(got, expected, "known={known} opener={opener} valid={valid}");
        }
    }

    #[test]
    fn opener_dominates_validity() {
        assert_eq!(
            classify_engagement(Some(false), Some(true), Some(false)).unwrap(),
            EngagementDecision::Onboard
        );
    }

    #[test]
    fn known_user_invalid_reply_is_offboarded() {
        assert_eq!(
            classify_engagement(Some(true), Some(false), Some(false)).unwrap(),
            EngagementDecision::Offboard
        );
    }

    #[test]
    fn missing_fact_is_rejected() {
        let err = classify_engagement(Some(true), None, Some(true)).unwrap_err();
        assert!(err.to_string().contains("is_thread_opener"));

        let err = classify_engagement(Some(false), Some(true), None).unwrap_err();
        assert!(matches!(err, EngagementError::InvalidInput(_)));
    }

    #[test]
    fn decision_serializes_snake_case() {
        let json = serde_json::to_string(&EngagementDecision::Offboard).unwrap();
        assert_eq!(json, "\"offboard\"");
        assert_eq!(EngagementDecision::Onboard.to_string(), "onboard");
    }
}
