//! inbox-poller - Entry point for the scheduled poll job

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use inbox_poller::config::PollerSettings;
use inbox_poller::providers::email::GmailConnector;
use inbox_poller::storage::{Database, KeychainAccess};
use inbox_poller::PollerService;

#[derive(Parser)]
#[command(name = "inbox-poller", version, about = "Poll vendor inboxes for purchasing mail")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file (JSON). Defaults to the platform config directory.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file. Overrides the settings and INBOX_POLLER_DB.
    #[arg(short, long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    /// Poll every inbox, even if its interval has not elapsed
    #[arg(short, long)]
    force: bool,

    /// Keep polling until interrupted
    #[arg(short, long)]
    watch: bool,

    /// Seconds between cycles in watch mode
    #[arg(short, long, value_name = "SECONDS")]
    interval: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an inbox refresh token in the OS keychain
    StoreToken {
        /// Inbox id the token belongs to
        inbox_id: String,
        /// OAuth refresh token
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut settings =
        PollerSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(path) = &cli.database {
        settings.database.path = Some(path.clone());
    }

    let keychain = match &settings.keychain_service {
        Some(service) => KeychainAccess::with_service(service.clone()),
        None => KeychainAccess::new(),
    };

    if let Some(Commands::StoreToken { inbox_id, token }) = &cli.command {
        let key = KeychainAccess::refresh_token_key(inbox_id);
        keychain
            .store(&key, token)
            .await
            .context("failed to store refresh token")?;
        println!("keychain:{}", key);
        return Ok(());
    }

    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    let connector = GmailConnector::new(
        Duration::from_secs(settings.http.timeout_seconds),
        settings.http.retry.clone(),
    )?;
    let poller = PollerService::new(Arc::new(connector), keychain);

    tracing::info!(database = %db_path.display(), "Starting inbox poller");

    if !cli.watch {
        let summary = poller.run_cycle(&db, &settings, cli.force).await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if !summary.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let interval = Duration::from_secs(
        cli.interval
            .unwrap_or(settings.polling.watch_interval_seconds)
            .max(1),
    );
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = poller.run_cycle(&db, &settings, cli.force).await;
                println!("{}", serde_json::to_string(&summary)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break;
            }
        }
    }

    Ok(())
}
