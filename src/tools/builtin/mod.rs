//! Built-in tools.

pub mod calendar;

pub use calendar::register_calendar_tools;
