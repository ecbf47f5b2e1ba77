//! Durable publisher state: the published set and the daily quota.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Posts released in the current quota window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuota {
    #[serde(rename = "daily_count", default)]
    pub count: u32,
    #[serde(rename = "daily_window_date", default)]
    pub window_date: Option<NaiveDate>,
}

impl DailyQuota {
    /// Reset the counter when `today` differs from the window date.
    ///
    /// Returns `true` when a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.window_date == Some(today) {
            return false;
        }
        self.count = 0;
        self.window_date = Some(today);
        true
    }

    pub fn is_exhausted(&self, max: u32) -> bool {
        self.count >= max
    }

    /// Count one release on `today`.
    pub fn record(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.count = self.count.saturating_add(1);
    }
}

/// Everything that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherState {
    /// Story keys already released. Only ever grows.
    #[serde(default)]
    pub published: BTreeSet<String>,
    #[serde(flatten)]
    pub quota: DailyQuota,
}

impl PublisherState {
    pub fn is_published(&self, key: &str) -> bool {
        self.published.contains(key)
    }

    /// Commit a successful release.
    pub fn mark_published(&mut self, key: String, today: NaiveDate) {
        self.published.insert(key);
        self.quota.record(today);
    }

    /// Merge keys from another snapshot.
    pub fn absorb<I: IntoIterator<Item = String>>(&mut self, keys: I) {
        self.published.extend(keys);
    }
}
