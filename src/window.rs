//! Time-of-day posting window.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::error::{Error, Result};

/// Quiet hours during which nothing is published, in a fixed UTC offset.
///
/// The quiet interval is half-open, `[quiet_start, quiet_end)`, and may wrap
/// past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingWindow {
    pub quiet_start: NaiveTime,
    pub quiet_end: NaiveTime,
    pub offset: FixedOffset,
}

impl Default for PostingWindow {
    fn default() -> Self {
        Self {
            quiet_start: NaiveTime::from_hms_opt(23, 50, 0).expect("static quiet start"),
            quiet_end: NaiveTime::from_hms_opt(7, 0, 0).expect("static quiet end"),
            offset: FixedOffset::east_opt(3 * 3600).expect("static offset"),
        }
    }
}

impl PostingWindow {
    /// Build a window from `HH:MM` strings and an offset in whole hours.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparsable times or an offset outside
    /// ±23 hours.
    pub fn from_parts(quiet_start: &str, quiet_end: &str, offset_hours: i32) -> Result<Self> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| Error::Config(format!("invalid time {s:?}: {e}")))
        };
        let offset = FixedOffset::east_opt(offset_hours.saturating_mul(3600))
            .filter(|_| offset_hours.abs() <= 23)
            .ok_or_else(|| Error::Config(format!("invalid UTC offset {offset_hours}")))?;
        Ok(Self {
            quiet_start: parse(quiet_start)?,
            quiet_end: parse(quiet_end)?,
            offset,
        })
    }

    /// Whether a post may be released at local wall-clock time `time`.
    pub fn is_posting_allowed(&self, time: NaiveTime) -> bool {
        let quiet = if self.quiet_start <= self.quiet_end {
            time >= self.quiet_start && time < self.quiet_end
        } else {
            time >= self.quiet_start || time < self.quiet_end
        };
        !quiet
    }

    /// Convert an instant to local time in the window's offset.
    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    /// Local calendar date for `now`; the quota window key.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    /// Whether posting is allowed at instant `now`.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        self.is_posting_allowed(self.local(now).time())
    }
}
