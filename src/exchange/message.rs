//! Inbound email model and raw-message parsing.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One received (or sent) email. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message-ID without angle brackets.
    pub message_id: String,
    /// In-Reply-To target; `None` means this message opens a thread.
    pub previous_message_id: Option<String>,
    pub sender: String,
    /// To then Cc, in header order.
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub direction: Direction,
}

impl InboundMessage {
    pub fn is_thread_opener(&self) -> bool {
        self.previous_message_id.is_none()
    }

    /// Body with quoted history removed.
    pub fn reply_text(&self) -> String {
        strip_quoted_text(&self.body)
    }
}

/// Strip `<` and `>` around a Message-ID.
pub fn normalize_message_id(id: &str) -> String {
    id.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

/// Parse an RFC 5322 message.
///
/// Messages sent by `assistant_address` are tagged outbound. A missing
/// Message-ID gets a generated one; a missing sender is an error.
pub fn parse_raw_email(raw: &[u8], assistant_address: &str) -> Result<InboundMessage, ExchangeError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| ExchangeError::Unparseable("not an RFC 5322 message".into()))?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| ExchangeError::InvalidInput("message has no From address".into()))?;

    let message_id = parsed
        .message_id()
        .map(normalize_message_id)
        .unwrap_or_else(|| format!("gen-{}@schedule-assist", Uuid::new_v4()));

    let in_reply_to = parsed.in_reply_to();
    let previous_message_id = in_reply_to
        .as_text()
        .map(normalize_message_id)
        .or_else(|| {
            in_reply_to
                .as_text_list()
                .and_then(|ids| ids.last())
                .map(|id| normalize_message_id(id))
        })
        .filter(|id| !id.is_empty());

    let mut recipients = extract_addresses(parsed.to());
    recipients.extend(extract_addresses(parsed.cc()));

    let subject = parsed.subject().unwrap_or("").to_string();
    let body = extract_text(&parsed);

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let direction = if sender.eq_ignore_ascii_case(assistant_address) {
        Direction::Outbound
    } else {
        Direction::Inbound
    };

    Ok(InboundMessage {
        message_id,
        previous_message_id,
        sender,
        recipients,
        subject,
        body,
        received_at,
        direction,
    })
}

/// Email addresses from an optional address header, lowercased.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_lowercase()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_lowercase()))
            })
            .collect(),
    }
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip quoted history from an email body.
///
/// Drops `>`-prefixed lines and everything after an "On ... wrote:" or
/// "--- Original Message ---" marker.
pub fn strip_quoted_text(body: &str) -> String {
    let mut kept = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || (trimmed.starts_with("---") && trimmed.contains("Original Message"))
        {
            break;
        }
        kept.push(line);
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }

    kept.join("\n")
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
