//! Reply bodies.

use crate::engagement::EngagementDecision;

/// `Re:`-prefixed subject, without stacking prefixes.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: your message".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

pub fn onboarding(onboarding_url: &str) -> String {
    format!(
        "Hi,\n\n\
         I'm a scheduling assistant, but I don't have access to your calendar yet.\n\
         Connect it here and reply to this email once you're done:\n\n\
         {onboarding_url}\n\n\
         After that, just email me whenever you need a meeting booked or moved."
    )
}

pub fn invalid_thread() -> String {
    "Hi,\n\n\
     I couldn't match your reply to a conversation I'm part of, so I haven't acted on it.\n\
     If you still need something scheduled, please start a new email to me."
        .to_string()
}

pub fn failure_apology(decision: EngagementDecision) -> String {
    let what = match decision {
        EngagementDecision::Onboard => "setting you up",
        EngagementDecision::Engage => "handling your scheduling request",
        EngagementDecision::Offboard => "processing your reply",
    };
    format!(
        "Hi,\n\n\
         Something went wrong while {what}. Nothing on your calendar was changed.\n\
         Please try again in a few minutes."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_subject_does_not_double() {
        assert_eq!(reply_subject("Lunch"), "Re: Lunch");
        assert_eq!(reply_subject("Re: Lunch"), "Re: Lunch");
        assert_eq!(reply_subject("RE: Lunch"), "RE: Lunch");
        assert_eq!(reply_subject("  "), "Re: your message");
    }

    #[test]
    fn onboarding_includes_link() {
        assert!(onboarding("https://assist.example/connect").contains("https://assist.example/connect"));
    }

    #[test]
    fn apology_names_the_step() {
        assert!(failure_apology(EngagementDecision::Engage).contains("scheduling request"));
    }
}
