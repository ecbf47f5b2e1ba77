//! Publication scheduler.
//!
//! One call to [`Publisher::run_cycle`] walks a cycle through
//! gating, harvesting, selecting, then a sequential prepare/send/commit loop.
//! A story key is committed only after the channel accepted the post, so a
//! crash between send and commit can at worst repeat a post, never lose one.

use crate::delivery::DeliveryChannel;
use crate::extract::extract;
use crate::format::{format_post, is_publishable};
use crate::harvest::NewsBackend;
use crate::models::{CandidateItem, Counters, FormatMode, PostImage, PreparedPost};
use crate::state::PublisherState;
use crate::store::StateStore;
use crate::text::{NormalizerParams, word_count};
use crate::utils::{random_duration, truncate_for_log};
use crate::window::PostingWindow;
use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::rng;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on prepare attempts in one cycle.
pub const MAX_CYCLE_ATTEMPTS: usize = 15;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why a cycle did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRefusal {
    PlaceholderMissing,
    QuotaExhausted,
    QuietHours,
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            GateRefusal::PlaceholderMissing => "placeholder image missing",
            GateRefusal::QuotaExhausted => "daily quota exhausted",
            GateRefusal::QuietHours => "quiet hours",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Gated(GateRefusal),
    NoCandidates,
    Completed,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub requested: usize,
    pub published: usize,
    pub attempts: usize,
    pub thin_skips: usize,
    pub image_skips: usize,
    pub failed_sends: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(requested: usize) -> Self {
        Self {
            requested,
            published: 0,
            attempts: 0,
            thin_skips: 0,
            image_skips: 0,
            failed_sends: 0,
            outcome: CycleOutcome::Completed,
        }
    }

    fn gated(requested: usize, refusal: GateRefusal) -> Self {
        Self {
            outcome: CycleOutcome::Gated(refusal),
            ..Self::new(requested)
        }
    }
}

/// Static settings of a publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Channel identifier passed to the delivery channel.
    pub destination: String,
    /// Fallback image. Publishing is refused while it is missing.
    pub placeholder: PathBuf,
    pub daily_limit: u32,
    pub window: PostingWindow,
    pub mode: FormatMode,
    pub params: NormalizerParams,
    /// Pause after each release, drawn uniformly from this range.
    pub post_delay: (Duration, Duration),
}

impl PublisherConfig {
    pub fn new(destination: impl Into<String>, placeholder: impl Into<PathBuf>) -> Self {
        let mode = FormatMode::default();
        Self {
            destination: destination.into(),
            placeholder: placeholder.into(),
            daily_limit: 20,
            window: PostingWindow::default(),
            mode,
            params: NormalizerParams::default().with_strict(mode.strict()),
            post_delay: (Duration::from_secs(45), Duration::from_secs(120)),
        }
    }
}

/// The stateful core: owns the collaborators and the published state.
pub struct Publisher<B, C, S, K = SystemClock> {
    backend: B,
    channel: C,
    store: S,
    clock: K,
    config: PublisherConfig,
    state: Arc<Mutex<PublisherState>>,
}

impl<B, C, S> Publisher<B, C, S>
where
    B: NewsBackend,
    C: DeliveryChannel,
    S: StateStore,
{
    pub fn new(backend: B, channel: C, store: S, config: PublisherConfig, state: PublisherState) -> Self {
        Self {
            backend,
            channel,
            store,
            clock: SystemClock,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl<B, C, S, K> Publisher<B, C, S, K>
where
    B: NewsBackend,
    C: DeliveryChannel,
    S: StateStore,
    K: Clock,
{
    pub fn with_clock<K2: Clock>(self, clock: K2) -> Publisher<B, C, S, K2> {
        Publisher {
            backend: self.backend,
            channel: self.channel,
            store: self.store,
            clock,
            config: self.config,
            state: self.state,
        }
    }

    /// Handle to the live state, for flushing on shutdown.
    pub fn shared_state(&self) -> Arc<Mutex<PublisherState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, PublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn today(&self) -> NaiveDate {
        self.config.window.local_date(self.clock.now())
    }

    pub fn counters(&self) -> Counters {
        let today = self.today();
        let state = self.lock();
        Counters {
            sources: self.backend.source_count(),
            total_published: state.published.len(),
            published_today: if state.quota.window_date == Some(today) {
                state.quota.count
            } else {
                0
            },
        }
    }

    fn quota_gate(&self) -> Result<(), GateRefusal> {
        let today = self.today();
        let mut state = self.lock();
        if state.quota.roll_over(today) {
            info!(%today, "New daily quota window");
        }
        if state.quota.is_exhausted(self.config.daily_limit) {
            return Err(GateRefusal::QuotaExhausted);
        }
        Ok(())
    }

    fn gate(&self) -> Result<(), GateRefusal> {
        if !self.config.placeholder.is_file() {
            error!(
                path = %self.config.placeholder.display(),
                "Placeholder image not found; refusing to publish"
            );
            return Err(GateRefusal::PlaceholderMissing);
        }
        self.quota_gate()?;
        if !self.config.window.allows(self.clock.now()) {
            return Err(GateRefusal::QuietHours);
        }
        Ok(())
    }

    fn select(&self, items: Vec<CandidateItem>) -> Vec<CandidateItem> {
        let mut fresh = {
            let state = self.lock();
            items
                .into_iter()
                .filter(|item| !state.is_published(&item.story_key()))
                .collect::<Vec<_>>()
        };
        fresh.shuffle(&mut rng());
        fresh
    }

    fn next_delay(&self) -> Duration {
        let (lo, hi) = self.config.post_delay;
        random_duration(lo, hi)
    }

    /// Build a post for `item`, or record why it was skipped.
    #[instrument(level = "info", skip_all, fields(title = %truncate_for_log(&item.title, 70)))]
    async fn prepare(&self, item: &CandidateItem, report: &mut CycleReport) -> Option<PreparedPost> {
        let (mode, params) = (self.config.mode, &self.config.params);
        let html = self.backend.fetch_article(&item.link).await.unwrap_or_default();
        let extracted = extract(&html, &item.title, mode, params);
        let body_text = format_post(&item.title, &item.description, &extracted, mode, params);

        let words = word_count(&body_text);
        if !is_publishable(&body_text) {
            info!(words, "Too little text; skipping");
            report.thin_skips += 1;
            return None;
        }

        let downloaded = match item.image_url.as_deref() {
            Some(url) => self.backend.download_image(url).await.map(PostImage::Downloaded),
            None => None,
        };
        let image = downloaded.or_else(|| {
            self.config
                .placeholder
                .is_file()
                .then(|| PostImage::Placeholder(self.config.placeholder.clone()))
        });
        let Some(image) = image else {
            warn!("No image and no placeholder; skipping");
            report.image_skips += 1;
            return None;
        };

        debug!(words, temporary = image.is_temporary(), "Prepared post");
        Some(PreparedPost {
            title: item.title.clone(),
            body_text,
            source_link: item.link.clone(),
            image: Some(image),
            word_count: words,
        })
    }

    fn commit(&self, key: String) {
        let today = self.today();
        let mut state = self.lock();
        state.mark_published(key, today);
        if let Err(e) = self.store.save(&state) {
            error!(error = %e, "Failed to persist publisher state");
        }
    }

    async fn discard_image(post: &PreparedPost) {
        if let Some(PostImage::Downloaded(path)) = &post.image {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete temporary image");
            }
        }
    }

    /// Run one publication cycle aiming for `requested` posts.
    ///
    /// Never fails: every problem ends up in the returned report and the log.
    #[instrument(level = "info", skip(self))]
    pub async fn run_cycle(&self, requested: usize) -> CycleReport {
        if let Err(refusal) = self.gate() {
            info!(%refusal, "Cycle gated");
            return CycleReport::gated(requested, refusal);
        }
        let mut report = CycleReport::new(requested);

        let candidates = self.select(self.backend.harvest().await);
        if candidates.is_empty() {
            info!("No unpublished stories");
            report.outcome = CycleOutcome::NoCandidates;
            return report;
        }

        let max_attempts = (candidates.len() * 2)
            .min(MAX_CYCLE_ATTEMPTS)
            .min(candidates.len());
        info!(candidates = candidates.len(), max_attempts, "Selected candidates");

        for item in candidates.into_iter().take(max_attempts) {
            if report.published >= requested {
                break;
            }
            if let Err(refusal) = self.quota_gate() {
                info!(%refusal, "Stopping cycle");
                break;
            }
            report.attempts += 1;

            let Some(post) = self.prepare(&item, &mut report).await else {
                continue;
            };
            let image = post.image.as_ref().map(PostImage::path);
            let sent = self
                .channel
                .send_post(&self.config.destination, &post.body_text, image)
                .await;
            Self::discard_image(&post).await;

            match sent {
                Ok(()) => {
                    self.commit(item.story_key());
                    report.published += 1;
                    info!(
                        title = %truncate_for_log(&post.title, 70),
                        link = %post.source_link,
                        words = post.word_count,
                        "Published"
                    );
                    if report.published < requested {
                        sleep(self.next_delay()).await;
                    }
                }
                Err(e) => {
                    report.failed_sends += 1;
                    warn!(link = %post.source_link, error = %e, "Send failed");
                }
            }
        }

        info!(
            published = report.published,
            requested,
            attempts = report.attempts,
            thin = report.thin_skips,
            failed = report.failed_sends,
            "Cycle finished"
        );
        report
    }
}
