use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use time::Date;
use time::macros::format_description;

use pmbridge_service::app::{build_reconciler, require_persistent_storage};
use pmbridge_service::config::AppConfig;
use pmbridge_service::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use pmbridge_service::{WebhookEvent, observability};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From PMBRIDGE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (pmbridge.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (PMBRIDGE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[derive(Parser)]
#[command(name = "pmbridge")]
#[command(about = "Practice-management bridge: payment reconciliation and subscription billing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for pending billing rows and due subscriptions (default)
    Run,

    /// Record a pre-parsed webhook event read from a JSON file
    Webhook {
        /// File holding `{"kind": ..., "event_id": ..., "payload": {...}}`
        file: PathBuf,
    },

    /// Re-run the sync of one stored event
    Retry {
        event_id: String,
    },

    /// Retry pending billing rows once
    RetryPending {
        /// Maximum rows to retry
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Bill subscriptions due on a date once
    BillDue {
        /// Billing date (YYYY-MM-DD), today when omitted
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Validate the configuration and print it with secrets masked
    CheckConfig,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    let cli = Cli::parse();
    let (config_path, source) = resolve_config_path(cli.config.clone());

    let explicit = match source {
        ConfigSource::Default => None,
        _ => Some(config_path.as_str()),
    };
    let cfg = match load_config(explicit) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    observability::apply_logging_level(&cfg.logging.level);

    if let Err(e) = run(cli.command.unwrap_or(Commands::Run), cfg).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, cfg: AppConfig) -> Result<()> {
    if let Commands::CheckConfig = command {
        let rendered = toml::to_string_pretty(&cfg.redacted()).context("failed to render config")?;
        println!("{rendered}");
        if !cfg.storage.is_persistent() {
            eprintln!(
                "Warning: storage.backend is memory; billing rows are lost on exit and \
                 retry, retry-pending and bill-due are unavailable"
            );
        }
        return Ok(());
    }

    match &command {
        Commands::Retry { .. } => require_persistent_storage(&cfg, "retry")?,
        Commands::RetryPending { .. } => require_persistent_storage(&cfg, "retry-pending")?,
        Commands::BillDue { .. } => require_persistent_storage(&cfg, "bill-due")?,
        Commands::Run | Commands::Webhook { .. } if !cfg.storage.is_persistent() => {
            tracing::warn!("Billing rows are kept in memory and will not survive this process");
        }
        _ => {}
    }

    let reconciler = build_reconciler(&cfg).await?;

    match command {
        Commands::Run => {
            let poll_interval = Duration::from_secs(cfg.billing.poll_interval_secs);
            tokio::select! {
                _ = reconciler.run(poll_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
            }
        }
        Commands::Webhook { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let event: WebhookEvent =
                serde_json::from_str(&raw).context("webhook file is not a valid event")?;
            let ack = reconciler.handle(event).await?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
        Commands::Retry { event_id } => match reconciler.retry(&event_id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => anyhow::bail!("no billing row for event {event_id}"),
        },
        Commands::RetryPending { limit } => {
            let limit = limit.unwrap_or(cfg.billing.retry_batch_size);
            let settled = reconciler.retry_pending(limit).await?;
            println!("settled {settled} row(s)");
        }
        Commands::BillDue { date } => {
            let today = match date {
                Some(date) => parse_date(&date)?,
                None => time::OffsetDateTime::now_utc().date(),
            };
            let billed = reconciler.run_due_subscriptions(today).await?;
            println!("billed {billed} subscription(s) for {today}");
        }
        Commands::CheckConfig => {}
    }
    Ok(())
}

fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid date {value}, expected YYYY-MM-DD"))
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: PMBRIDGE_CONFIG
/// 3. Default: pmbridge.toml
fn resolve_config_path(cli: Option<String>) -> (String, ConfigSource) {
    if let Some(path) = cli {
        return (path, ConfigSource::CliArgument);
    }

    if let Ok(path) = env::var("PMBRIDGE_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default)
}
