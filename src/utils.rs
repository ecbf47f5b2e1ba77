//! Utility functions for logging, temporary files, and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for log fields
//! - Unique temporary file naming for downloaded images
//! - Random jitter for pacing posts and driver intervals
//! - File system validation for the work and state directories

use crate::error::Result;
use rand::{Rng, rng};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a count of
/// the dropped characters appended. Counting is by `char`, so headlines in
/// any script are safe to pass in.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 chars)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}…(+{} chars)", head, total - max)
    }
}

/// Build a unique path in `dir` for a temporary file.
///
/// Names look like `{prefix}_{unix_millis}_{random}.{ext}`.
pub fn unique_temp_path(dir: &Path, prefix: &str, ext: &str) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let salt: u32 = rng().random_range(1000..=9999);
    dir.join(format!("{prefix}_{millis}_{salt}.{ext}"))
}

/// A uniformly random duration in `[lo, hi]`, at millisecond resolution.
///
/// Returns `lo` when the range is empty.
pub fn random_duration(lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let millis = rng().random_range(lo.as_millis() as u64..=hi.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a small marker
/// file to prove write access.
///
/// # Errors
///
/// [`crate::error::Error::Io`] when the directory cannot be created or written to.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    let marker = unique_temp_path(path, ".write_check", "tmp");
    fs::write(&marker, b"").await?;
    if let Err(e) = fs::remove_file(&marker).await {
        warn!(marker = %marker.display(), error = %e, "Could not remove write check file");
    }
    debug!("Directory is writable");
    Ok(())
}
