//! Schedule Assist: email engagement routing and calendar availability.

pub mod availability;
pub mod calendar;
pub mod config;
pub mod engagement;
pub mod error;
pub mod exchange;
pub mod mail;
pub mod tools;
