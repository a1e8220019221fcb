//! Email exchanges: message model, parsing, thread tracking, known users.

pub mod directory;
pub mod message;
pub mod tracker;

pub use directory::{AllowlistDirectory, UserDirectory};
pub use message::{Direction, InboundMessage, parse_raw_email, strip_quoted_text};
pub use tracker::{ExchangeFacts, ExchangeService, InMemoryExchanges};
