//! Configuration file loading and settings resolution.
//!
//! Settings come from three layers: built-in defaults, an optional YAML file,
//! and the command line (with environment fallbacks). Later layers win.

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::harvest::{DEFAULT_SOURCES, HarvestSettings};
use crate::models::FormatMode;
use crate::scheduler::PublisherConfig;
use crate::service::DriverSettings;
use crate::text::NormalizerParams;
use crate::window::PostingWindow;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_CHANNEL: &str = "@LivePiter";
pub const DEFAULT_STATE_FILE: &str = "posted.json";
pub const DEFAULT_PLACEHOLDER: &str = "./static/placeholder.jpg";

/// Contents of `config.yaml`. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub channel_id: Option<String>,
    pub sources: Option<Vec<String>>,
    pub state_file: Option<PathBuf>,
    pub placeholder: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub daily_limit: Option<u32>,
    pub utc_offset: Option<i32>,
    /// `HH:MM`
    pub quiet_start: Option<String>,
    /// `HH:MM`
    pub quiet_end: Option<String>,
    pub mode: Option<FormatMode>,
    pub per_source_limit: Option<usize>,
    pub page_image_lookup: Option<bool>,
    pub sentence_overlap: Option<f64>,
    pub title_overlap: Option<f64>,
    pub post_delay_secs: Option<[u64; 2]>,
    pub auto_interval_mins: Option<[u64; 2]>,
    pub probe_interval_mins: Option<[u64; 2]>,
    pub probe_chance: Option<f64>,
}

impl FileConfig {
    /// Read and parse a YAML config file.
    ///
    /// # Errors
    ///
    /// IO errors and YAML syntax or unknown-key errors.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str::<FileConfig>(&raw)?;
        info!("Loaded configuration file");
        Ok(config)
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: Option<String>,
    pub dry_run: bool,
    pub sources: Vec<String>,
    pub state_file: PathBuf,
    pub work_dir: PathBuf,
    pub harvest: HarvestSettings,
    pub publisher: PublisherConfig,
    pub drivers: DriverSettings,
}

fn secs_pair([lo, hi]: [u64; 2], unit: u64) -> (Duration, Duration) {
    (
        Duration::from_secs(lo.saturating_mul(unit)),
        Duration::from_secs(hi.saturating_mul(unit)),
    )
}

fn ratio(name: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::Config(format!("{name} must be within 0..=1, got {value}")))
    }
}

impl Settings {
    /// Merge the CLI over the file config over defaults and validate.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a missing bot token outside dry-run mode, an
    /// empty source list, bad times or offsets, and out-of-range ratios.
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let bot_token = cli.bot_token.clone().filter(|t| !t.trim().is_empty());
        if bot_token.is_none() && !cli.dry_run {
            return Err(Error::Config(
                "BOT_TOKEN is required unless --dry-run is given".to_string(),
            ));
        }

        let sources = if !cli.sources.is_empty() {
            cli.sources.clone()
        } else {
            file.sources
                .unwrap_or_else(|| DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect())
        };
        let sources = sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if sources.is_empty() {
            return Err(Error::Config("no news sources configured".to_string()));
        }

        let offset = cli.utc_offset.or(file.utc_offset).unwrap_or(3);
        let window = PostingWindow::from_parts(
            file.quiet_start.as_deref().unwrap_or("23:50"),
            file.quiet_end.as_deref().unwrap_or("07:00"),
            offset,
        )?;

        let mode = cli.mode.or(file.mode).unwrap_or_default();
        let defaults = NormalizerParams::default();
        let params = NormalizerParams {
            strict: mode.strict(),
            sentence_overlap: ratio(
                "sentence_overlap",
                file.sentence_overlap.unwrap_or(defaults.sentence_overlap),
            )?,
            title_overlap: ratio(
                "title_overlap",
                file.title_overlap.unwrap_or(defaults.title_overlap),
            )?,
        };

        let channel = cli
            .channel_id
            .clone()
            .or(file.channel_id)
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let placeholder = cli
            .placeholder
            .clone()
            .or(file.placeholder)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLACEHOLDER));

        let mut publisher = PublisherConfig::new(channel, placeholder);
        publisher.daily_limit = cli.daily_limit.or(file.daily_limit).unwrap_or(publisher.daily_limit);
        publisher.window = window;
        publisher.mode = mode;
        publisher.params = params;
        if let Some(pair) = file.post_delay_secs {
            publisher.post_delay = secs_pair(pair, 1);
        }

        let mut harvest = HarvestSettings::default();
        if let Some(limit) = file.per_source_limit {
            harvest.per_source_limit = limit;
        }
        harvest.page_image_lookup = !cli.no_page_images && file.page_image_lookup.unwrap_or(true);

        let mut drivers = DriverSettings::default();
        if let Some(pair) = file.auto_interval_mins {
            drivers.auto_interval = secs_pair(pair, 60);
        }
        if let Some(pair) = file.probe_interval_mins {
            drivers.probe_interval = secs_pair(pair, 60);
        }
        if let Some(chance) = file.probe_chance {
            drivers.probe_chance = ratio("probe_chance", chance)?;
        }

        Ok(Self {
            bot_token,
            dry_run: cli.dry_run,
            sources,
            state_file: cli
                .state_file
                .clone()
                .or(file.state_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            work_dir: cli
                .work_dir
                .clone()
                .or(file.work_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            harvest,
            publisher,
            drivers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("news_relay").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_in_dry_run() {
        let settings = Settings::resolve(&cli(&["--dry-run", "--channel-id", "@x"]), FileConfig::default()).unwrap();
        assert_eq!(settings.publisher.destination, "@x");
        assert_eq!(settings.publisher.daily_limit, 20);
        assert_eq!(settings.harvest.per_source_limit, 5);
        assert_eq!(settings.publisher.placeholder, PathBuf::from(DEFAULT_PLACEHOLDER));
        assert!(settings.harvest.page_image_lookup);
    }

    #[test]
    fn test_token_required_without_dry_run() {
        let err = Settings::resolve(&cli(&["--bot-token", " "]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_yaml_layer_and_cli_precedence() {
        let yaml = r#"
channel_id: "@from_file"
daily_limit: 7
utc_offset: 0
quiet_start: "22:00"
quiet_end: "06:00"
mode: extended
sources:
  - https://example.com/rss
post_delay_secs: [1, 2]
probe_chance: 0.5
"#;
        let file: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let settings =
            Settings::resolve(&cli(&["--dry-run", "--daily-limit", "3", "--channel-id", "@cli"]), file).unwrap();

        assert_eq!(settings.publisher.destination, "@cli");
        assert_eq!(settings.publisher.daily_limit, 3);
        assert_eq!(settings.sources, vec!["https://example.com/rss".to_string()]);
        assert_eq!(settings.publisher.mode, FormatMode::Extended);
        assert!(settings.publisher.params.strict);
        assert_eq!(
            settings.publisher.post_delay,
            (Duration::from_secs(1), Duration::from_secs(2))
        );
        assert_eq!(settings.drivers.probe_chance, 0.5);
        assert_eq!(
            settings.publisher.window,
            PostingWindow::from_parts("22:00", "06:00", 0).unwrap()
        );
    }

    #[test]
    fn test_unknown_yaml_key_rejected() {
        assert!(serde_yaml::from_str::<FileConfig>("chanel_id: typo\n").is_err());
    }

    #[test]
    fn test_bad_ratio_rejected() {
        let file = FileConfig {
            title_overlap: Some(1.5),
            ..FileConfig::default()
        };
        assert!(Settings::resolve(&cli(&["--dry-run"]), file).is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "daily_limit: 4\n").unwrap();
        assert_eq!(FileConfig::load(&path).unwrap().daily_limit, Some(4));
        assert!(FileConfig::load(&tmp.path().join("missing.yaml")).is_err());
    }
}
