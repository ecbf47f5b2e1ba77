//! Command-line interface definitions for News Relay.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Most options can also come from environment variables (a `.env` file is
//! honoured) or from the YAML file given with `--config`; explicit flags and
//! environment values win over the file.

use crate::models::FormatMode;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the News Relay application.
///
/// # Examples
///
/// ```sh
/// # Run the service against Telegram
/// BOT_TOKEN=123:abc news_relay --channel-id @LivePiter
///
/// # Publish two posts right away and exit, without sending anything
/// news_relay --dry-run --post-now 2 --once
///
/// # Settings from a file
/// news_relay -c ./config.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// Destination channel, e.g. @LivePiter
    #[arg(long, env = "CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Log posts instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Feed URLs, comma separated
    #[arg(long, env = "NEWS_SOURCES", value_delimiter = ',')]
    pub sources: Vec<String>,

    /// File holding published story keys and the daily quota
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Fallback image used when a story has none
    #[arg(long, env = "PLACEHOLDER_PATH")]
    pub placeholder: Option<PathBuf>,

    /// Directory for downloaded images
    #[arg(long, env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Maximum posts per local calendar day
    #[arg(long, env = "DAILY_LIMIT")]
    pub daily_limit: Option<u32>,

    /// Local time zone as whole hours from UTC
    #[arg(long, env = "UTC_OFFSET", allow_hyphen_values = true)]
    pub utc_offset: Option<i32>,

    /// Post formatting preset
    #[arg(long, value_enum, env = "FORMAT_MODE")]
    pub mode: Option<FormatMode>,

    /// Do not fetch article pages to look for og:image
    #[arg(long)]
    pub no_page_images: bool,

    /// Run a cycle for this many posts at startup
    #[arg(long, value_name = "N")]
    pub post_now: Option<usize>,

    /// Exit after the startup cycle instead of running the service
    #[arg(long)]
    pub once: bool,
}
