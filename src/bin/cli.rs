//! Offerwatch CLI
//!
//! Local execution entry point: one-off runs, the long-running watcher and
//! maintenance commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use offerwatch::{
    error::Result,
    models::Config,
    pipeline::{self, CommandPoller, Orchestrator, RunOutcome, RunReport},
    services::{HttpPageSource, OfferExtractor, PageSource, TelegramClient},
    storage::{LocalStorage, StateStore, SubscriberStore},
};
use tokio::sync::watch;

/// Offerwatch - Housing Offer Watcher
#[derive(Parser, Debug)]
#[command(
    name = "offerwatch",
    version,
    about = "Notifies Telegram subscribers about new housing offers"
)]
struct Cli {
    /// Path to storage directory containing config and state files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a single run: fetch, diff, notify, persist
    Run,

    /// Run on the configured interval until Ctrl-C
    Watch {
        /// Do not poll for /start and /stop commands
        #[arg(long)]
        no_commands: bool,
    },

    /// Only handle /start and /stop commands until Ctrl-C
    Poll,

    /// Print the offers currently on the page as JSON
    Scrape {
        /// Parse a saved HTML file instead of fetching the page
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Show subscriber counts and active subscribers
    Subscribers,

    /// Validate configuration
    Validate,

    /// Show persisted run state
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Shutdown channel flipped on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Shutdown requested, finishing in-flight work...");
                let _ = tx.send(true);
            }
            Err(e) => {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                // Keep the sender alive so receivers do not see a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

fn log_report(report: &RunReport) {
    log::info!(
        "Run finished in {}ms: {} offer(s), {} new",
        report.duration_ms(),
        report.offer_count,
        report.new_offers
    );
    if let Some(delivery) = &report.delivery {
        log::info!(
            "Delivered to {}/{} subscriber(s), {} deactivated, {} transient failure(s)",
            delivery.delivered,
            delivery.attempted,
            delivery.deactivated.len(),
            delivery.transient_failures.len()
        );
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");
    let mut config = Config::load_or_default(&config_path);
    config.apply_env();
    config.validate()?;

    log::debug!("Loaded configuration from {}", config_path.display());

    let storage = Arc::new(LocalStorage::new(&cli.storage_dir));

    match cli.command {
        Command::Run => {
            config.require_bot_token()?;
            let client = Arc::new(TelegramClient::from_config(&config.telegram)?);
            let orchestrator = Orchestrator::from_config(&config, storage, client)?;

            let report = orchestrator.run_once().await;
            match &report.outcome {
                RunOutcome::Completed => log_report(&report),
                RunOutcome::Aborted { stage, .. } => {
                    log::warn!("Run aborted while {}; state left unchanged", stage)
                }
            }
        }

        Command::Watch { no_commands } => {
            config.require_bot_token()?;
            let client = Arc::new(TelegramClient::from_config(&config.telegram)?);
            let orchestrator = Arc::new(Orchestrator::from_config(
                &config,
                storage.clone(),
                client.clone(),
            )?);
            let shutdown = shutdown_on_ctrl_c();

            if no_commands {
                pipeline::run_schedule(orchestrator, &config.schedule, shutdown).await;
            } else {
                let poller = CommandPoller::from_config(&config, storage, client);
                let (runs, polled) = tokio::join!(
                    pipeline::run_schedule(orchestrator, &config.schedule, shutdown.clone()),
                    poller.run(shutdown),
                );
                log::info!("Watcher stopped after {} run(s)", runs);
                polled?;
            }
        }

        Command::Poll => {
            config.require_bot_token()?;
            let client = Arc::new(TelegramClient::from_config(&config.telegram)?);
            let poller = CommandPoller::from_config(&config, storage, client);
            poller.run(shutdown_on_ctrl_c()).await?;
        }

        Command::Scrape { html } => {
            let html = match html {
                Some(path) => tokio::fs::read_to_string(&path).await?,
                None => HttpPageSource::from_config(&config.source)?.fetch().await?,
            };
            let offers = OfferExtractor::from_config(&config)?.extract(&html)?;
            log::info!("Extracted {} offer(s)", offers.len());
            println!("{}", serde_json::to_string_pretty(&offers)?);
        }

        Command::Subscribers => {
            let all = storage.all().await?;
            let active: Vec<_> = all.iter().filter(|s| s.active).collect();

            log::info!(
                "Subscribers: {} total, {} active, {} inactive",
                all.len(),
                active.len(),
                all.len() - active.len()
            );
            for subscriber in active {
                log::info!("  {} ({})", subscriber.chat_id, subscriber.display_name());
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            log::info!("✓ Config OK ({} link strategies)", config.selectors.link.len());
            match config.require_bot_token() {
                Ok(_) => log::info!("✓ Bot token present"),
                Err(e) => log::warn!("{}", e),
            }
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());
            match storage.load_seen().await? {
                Some(ids) => log::info!("Seen-Set: {} offer id(s)", ids.len()),
                None => log::info!("Seen-Set: not initialized"),
            }
            match storage.load_status().await? {
                Some(status) => log::info!(
                    "Last run at {}: offers {}",
                    status.checked_at,
                    if status.offers_present {
                        "present"
                    } else {
                        "absent"
                    }
                ),
                None => log::info!("No run recorded yet."),
            }
            log::info!("Poll cursor: {}", storage.load_cursor().await?.offset);
        }
    }

    Ok(())
}
