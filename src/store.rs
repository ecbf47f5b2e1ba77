//! Durable storage for [`PublisherState`].

use crate::error::Result;
use crate::state::PublisherState;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Environment variable holding an extra JSON array of published story keys.
pub const POSTED_NEWS_ENV: &str = "POSTED_NEWS";

/// Load/save contract for publisher state.
///
/// Both calls are synchronous so the shutdown path can flush without a
/// runtime.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<PublisherState>;
    fn save(&self, state: &PublisherState) -> Result<()>;
}

/// JSON file store with atomic replace on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    env_snapshot: Option<String>,
}

impl JsonFileStore {
    /// Store at `path`, merging the `POSTED_NEWS` snapshot from the process
    /// environment on load.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_snapshot: std::env::var(POSTED_NEWS_ENV).ok(),
        }
    }

    /// Replace the environment snapshot (a JSON array of story keys).
    pub fn with_env_snapshot(mut self, snapshot: Option<String>) -> Self {
        self.env_snapshot = snapshot;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn env_keys(&self) -> Vec<String> {
        let Some(raw) = self.env_snapshot.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Vec::new();
        };
        serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring malformed {POSTED_NEWS_ENV} snapshot");
            Vec::new()
        })
    }
}

impl StateStore for JsonFileStore {
    /// Read the file (absent means empty state) and merge the env snapshot.
    ///
    /// # Errors
    ///
    /// A file that exists but cannot be read or parsed is an error rather
    /// than an empty state, so a damaged file never leads to reposting.
    #[instrument(level = "info", skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<PublisherState> {
        let mut state = match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str::<PublisherState>(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file yet; starting empty");
                PublisherState::default()
            }
            Err(e) => return Err(e.into()),
        };
        let from_file = state.published.len();
        state.absorb(self.env_keys());
        info!(
            published = state.published.len(),
            from_env = state.published.len() - from_file,
            daily_count = state.quota.count,
            "Loaded publisher state"
        );
        Ok(state)
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    fn save(&self, state: &PublisherState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(published = state.published.len(), "Saved publisher state");
        Ok(())
    }
}
