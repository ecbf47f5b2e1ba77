//! # News Relay
//!
//! Harvests Russian federal and St. Petersburg news feeds, distills each story
//! into a short clean post, and relays it to a Telegram channel under a daily
//! quota and outside quiet hours, never posting the same story twice.
//!
//! ## Usage
//!
//! ```sh
//! BOT_TOKEN=123:abc news_relay --channel-id @LivePiter
//! news_relay --dry-run --post-now 1 --once
//! ```
//!
//! ## Architecture
//!
//! 1. **Harvesting**: query every feed concurrently and collect candidates
//! 2. **Selecting**: drop stories already published, shuffle the rest
//! 3. **Preparing**: fetch the article, extract its body, format the post
//! 4. **Sending**: hand the post to the channel, then commit the story key
//!
//! A single worker task runs these cycles one at a time; the auto-poster, the
//! keep-alive prober and `--post-now` all queue requests to it.

use clap::Parser;
use std::error::Error;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod delivery;
mod error;
mod extract;
mod format;
mod harvest;
mod models;
mod scheduler;
mod service;
mod state;
mod store;
mod text;
mod utils;
mod window;

use cli::Cli;
use config::{FileConfig, Settings};
use delivery::{Channel, DryRunChannel, TelegramChannel};
use harvest::HttpBackend;
use scheduler::Publisher;
use state::PublisherState;
use store::{JsonFileStore, StateStore};
use utils::ensure_writable_dir;

/// Write the live state to disk. Used on shutdown.
fn flush(store: &JsonFileStore, state: &Mutex<PublisherState>) {
    let state = state.lock().unwrap_or_else(PoisonError::into_inner);
    match store.save(&state) {
        Ok(()) => info!(published = state.published.len(), "State flushed"),
        Err(e) => error!(error = %e, path = %store.path().display(), "Failed to flush state"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "news_relay starting up");

    // Parse CLI and resolve settings
    let args = Cli::parse();
    debug!(?args.config, dry_run = args.dry_run, "Parsed CLI arguments");
    let file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&args, file_config)?;

    // Early check: downloaded images need a writable work dir
    if let Err(e) = ensure_writable_dir(&settings.work_dir).await {
        error!(
            path = %settings.work_dir.display(),
            error = %e,
            "Work directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }
    if !settings.publisher.placeholder.is_file() {
        warn!(
            path = %settings.publisher.placeholder.display(),
            "Placeholder image not found; cycles will be refused until it exists"
        );
    }

    let store = JsonFileStore::new(&settings.state_file);
    let state = store.load()?;

    let backend = HttpBackend::new(
        settings.sources.clone(),
        settings.harvest.clone(),
        settings.work_dir.clone(),
    )?;
    let channel = match (&settings.bot_token, settings.dry_run) {
        (Some(token), false) => Channel::Telegram(TelegramChannel::new(token.as_str())?),
        _ => {
            info!("Dry run: posts will be logged, not sent");
            Channel::DryRun(DryRunChannel)
        }
    };
    info!(
        sources = settings.sources.len(),
        channel = %settings.publisher.destination,
        daily_limit = settings.publisher.daily_limit,
        mode = ?settings.publisher.mode,
        "Publisher configured"
    );

    let publisher = Publisher::new(backend, channel, store.clone(), settings.publisher.clone(), state);
    let shared_state = publisher.shared_state();
    let (handle, worker) = service::spawn(publisher);

    // ---- On-demand cycle ----
    if args.post_now.is_some() || args.once {
        let count = args.post_now.unwrap_or(1);
        tokio::select! {
            report = handle.request(count) => {
                let report = report?;
                info!(
                    requested = count,
                    published = report.published,
                    outcome = ?report.outcome,
                    "On-demand cycle done"
                );
            }
            _ = shutdown_signal() => {
                flush(&store, &shared_state);
                return Ok(());
            }
        }
    }

    if args.once {
        drop(handle);
        if let Err(e) = worker.await {
            error!(error = %e, "Publish worker panicked");
        }
        flush(&store, &shared_state);
        return Ok(());
    }

    // ---- Service mode ----
    tokio::select! {
        _ = service::auto_poster(handle.clone(), settings.drivers.clone()) => {
            warn!("Auto-poster exited");
        }
        _ = service::keep_alive_prober(handle.clone(), settings.drivers.clone()) => {
            warn!("Keep-alive prober exited");
        }
        _ = shutdown_signal() => {}
    }

    flush(&store, &shared_state);
    info!("Shutdown complete");
    Ok(())
}
