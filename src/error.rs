//! Error types for Schedule Assist.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engagement error: {0}")]
    Engagement(#[from] EngagementError),

    #[error("Availability error: {0}")]
    Availability(#[from] AvailabilityError),

    #[error("Calendar provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Engagement classification errors.
#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    /// A required fact was missing. The classifier never guesses a default.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Fact lookup failed for {sender}: {reason}")]
    FactLookup { sender: String, reason: String },
}

/// Availability engine errors.
#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Which side of the retry line a provider failure falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Retry advised (rate limit, network, upstream 5xx).
    Transient,
    /// User action required (expired auth, missing permission).
    Permanent,
}

/// Calendar backend errors.
///
/// Propagated to callers unmodified; retry policy belongs to whoever owns the
/// provider client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} transient failure: {reason}")]
    Transient { provider: String, reason: String },

    #[error("Provider {provider} permanent failure: {reason}")]
    Permanent { provider: String, reason: String },
}

impl ProviderError {
    pub fn transient(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn permanent(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permanent {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Transient { .. } => ProviderErrorKind::Transient,
            Self::Permanent { .. } => ProviderErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ProviderErrorKind::Transient
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. } | Self::Permanent { reason, .. } => reason,
        }
    }
}

/// Inbound email / exchange tracking errors.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unparseable email: {0}")]
    Unparseable(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Outbound email errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} calendar failure: {source}")]
    Provider {
        name: String,
        #[source]
        source: ProviderError,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
