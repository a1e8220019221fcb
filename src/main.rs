use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use schedule_assist::calendar::{CalendarProvider, GoogleCalendar, InMemoryCalendar};
use schedule_assist::config::{AssistConfig, GoogleCalendarConfig, SmtpConfig};
use schedule_assist::engagement::EngagementDispatcher;
use schedule_assist::exchange::{AllowlistDirectory, InMemoryExchanges, parse_raw_email};
use schedule_assist::mail::{
    Mailer, MailingHandler, RecordingMailer, SlotSuggestionAgent, SmtpMailer,
};
use schedule_assist::tools::builtin::register_calendar_tools;
use schedule_assist::tools::{ToolContext, ToolRegistry};

/// One request per stdin line.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Request {
    /// Run a calendar tool.
    Tool {
        tool: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Classify and answer a raw RFC 5322 email.
    Email { raw: String },
    /// Print tool definitions.
    ListTools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AssistConfig::from_env().context("invalid assistant configuration")?;

    eprintln!("📅 Schedule Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Timezone: {}", config.timezone.name());
    eprintln!("   Calendars: {}", config.calendar_ids.join(", "));

    // ── Calendar ────────────────────────────────────────────────────────
    let provider: Arc<dyn CalendarProvider> = match GoogleCalendarConfig::from_env() {
        Some(google) => {
            eprintln!("   Calendar: Google ({})", google.api_base);
            Arc::new(GoogleCalendar::new(google))
        }
        None => {
            eprintln!("   Calendar: in-memory (GOOGLE_CALENDAR_TOKEN not set)");
            Arc::new(InMemoryCalendar::new("memory"))
        }
    };

    // ── Mail ────────────────────────────────────────────────────────────
    let smtp = SmtpConfig::from_env();
    let assistant_address = smtp
        .as_ref()
        .map(|s| s.from_address.clone())
        .unwrap_or_else(|| "assistant@localhost".to_string());
    let mailer: Arc<dyn Mailer> = match &smtp {
        Some(cfg) => {
            eprintln!("   Mail: SMTP via {}:{}", cfg.host, cfg.port);
            Arc::new(SmtpMailer::new(cfg)?)
        }
        None => {
            eprintln!("   Mail: recording only (SMTP_HOST not set)");
            Arc::new(RecordingMailer::new())
        }
    };

    // ── Engagement ──────────────────────────────────────────────────────
    let exchanges = match config.exchange_stale_after {
        Some(limit) => InMemoryExchanges::new().with_staleness(limit),
        None => InMemoryExchanges::new(),
    };
    let exchanges = Arc::new(exchanges);
    let directory = Arc::new(AllowlistDirectory::new(config.known_users.clone()));
    let agent = Arc::new(SlotSuggestionAgent::new(provider.clone(), config.clone()));
    let handler = Arc::new(MailingHandler::new(
        mailer,
        exchanges.clone(),
        agent,
        assistant_address.clone(),
        config.onboarding_url.clone(),
    ));
    let dispatcher = EngagementDispatcher::new(directory, exchanges, handler);

    // ── Tools ───────────────────────────────────────────────────────────
    let tools = ToolRegistry::new();
    register_calendar_tools(&tools, provider, config).await;
    eprintln!("   Tools: {} registered\n", tools.count().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Err(e) => json!({ "ok": false, "error": format!("bad request: {e}") }),
            Ok(Request::ListTools) => json!({ "ok": true, "tools": tools.tool_definitions().await }),
            Ok(Request::Tool { tool, params }) => {
                match tools.execute(&tool, params, &ToolContext::default()).await {
                    Ok(output) => json!({ "ok": true, "output": output }),
                    Err(e) => json!({ "ok": false, "error": e.to_string() }),
                }
            }
            Ok(Request::Email { raw }) => match parse_raw_email(raw.as_bytes(), &assistant_address) {
                Err(e) => json!({ "ok": false, "error": e.to_string() }),
                Ok(message) => match dispatcher.process(&message).await {
                    Ok(outcome) => json!({ "ok": true, "outcome": outcome }),
                    Err(e) => json!({ "ok": false, "error": e.to_string() }),
                },
            },
        };

        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}
