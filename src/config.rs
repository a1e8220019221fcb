//! Configuration types, built from environment variables.

use chrono::Duration;
use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Longest accepted reschedule horizon (one year).
pub const MAX_RESCHEDULE_HORIZON_HOURS: i64 = 24 * 366;

/// Default Google Calendar v3 endpoint.
pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Core assistant settings.
#[derive(Debug, Clone)]
pub struct AssistConfig {
    /// Reporting timezone for human-readable output. Never used for arithmetic.
    pub timezone: Tz,
    /// How far a rescheduled event may travel from its original time.
    pub reschedule_horizon: Duration,
    /// Upper bound on concurrent calendar writes in one batch.
    pub max_concurrent_updates: usize,
    /// Default minimum free-slot length.
    pub min_slot_minutes: u32,
    /// Link sent to unknown users so they can connect a calendar.
    pub onboarding_url: String,
    /// Senders treated as known users (`*`, `@domain`, `domain`, or exact).
    pub known_users: Vec<String>,
    /// Calendars consulted for availability.
    pub calendar_ids: Vec<String>,
    /// Replies arriving this long after an exchange went quiet are stray.
    pub exchange_stale_after: Option<Duration>,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            reschedule_horizon: Duration::hours(72),
            max_concurrent_updates: 4,
            min_slot_minutes: 30,
            onboarding_url: "https://example.com/connect".to_string(),
            known_users: Vec::new(),
            calendar_ids: vec!["primary".to_string()],
            exchange_stale_after: None,
        }
    }
}

impl AssistConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, but reads through `lookup` (lets tests avoid
    /// touching the process environment).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timezone = match lookup("ASSIST_TIMEZONE") {
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::InvalidValue {
                key: "ASSIST_TIMEZONE".into(),
                message: format!("unknown IANA timezone '{name}'"),
            })?,
            None => defaults.timezone,
        };

        let horizon_hours = bounded_hours(&lookup, "ASSIST_RESCHEDULE_HORIZON_HOURS")?.unwrap_or(72);
        let exchange_stale_after =
            bounded_hours(&lookup, "ASSIST_EXCHANGE_STALE_AFTER_HOURS")?.map(Duration::hours);

        let max_concurrent_updates: usize = parse_or(
            &lookup,
            "ASSIST_MAX_CONCURRENT_UPDATES",
            defaults.max_concurrent_updates,
        )?;
        if max_concurrent_updates == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ASSIST_MAX_CONCURRENT_UPDATES".into(),
                message: "must be at least 1".into(),
            });
        }

        let min_slot_minutes = parse_or(&lookup, "ASSIST_MIN_SLOT_MINUTES", defaults.min_slot_minutes)?;

        let onboarding_url = lookup("ASSIST_ONBOARDING_URL").unwrap_or(defaults.onboarding_url);

        let known_users = split_list(lookup("ASSIST_KNOWN_USERS").unwrap_or_default());

        let calendar_ids = match lookup("ASSIST_CALENDAR_IDS") {
            Some(raw) => split_list(raw),
            None => defaults.calendar_ids,
        };
        if calendar_ids.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ASSIST_CALENDAR_IDS".into(),
                message: "at least one calendar id is required".into(),
            });
        }

        Ok(Self {
            timezone,
            reschedule_horizon: Duration::hours(horizon_hours),
            max_concurrent_updates,
            min_slot_minutes,
            onboarding_url,
            known_users,
            calendar_ids,
            exchange_stale_after,
        })
    }
}

/// Google Calendar credentials.
#[derive(Debug, Clone)]
pub struct GoogleCalendarConfig {
    pub access_token: SecretString,
    pub api_base: String,
}

impl GoogleCalendarConfig {
    /// Returns `None` if `GOOGLE_CALENDAR_TOKEN` is not set (provider disabled).
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("GOOGLE_CALENDAR_TOKEN").ok()?;
        let api_base = std::env::var("GOOGLE_CALENDAR_API_BASE")
            .unwrap_or_else(|_| GOOGLE_CALENDAR_API_BASE.to_string());
        Some(Self {
            access_token: SecretString::from(token),
            api_base,
        })
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// An optional hour count in `0..=MAX_RESCHEDULE_HORIZON_HOURS`.
fn bounded_hours<F>(lookup: &F, key: &str) -> Result<Option<i64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if lookup(key).is_none() {
        return Ok(None);
    }
    let hours: i64 = parse_or(lookup, key, 0)?;
    if !(0..=MAX_RESCHEDULE_HORIZON_HOURS).contains(&hours) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be between 0 and {MAX_RESCHEDULE_HORIZON_HOURS}"),
        });
    }
    Ok(Some(hours))
}

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
