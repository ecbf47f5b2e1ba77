//! Serialized publish service and its drivers.
//!
//! A single worker task owns the [`Publisher`] and runs one cycle at a time.
//! Every trigger (the periodic auto-poster, the keep-alive prober, and
//! on-demand requests from the command line) goes through a [`PublishHandle`],
//! so no two cycles ever overlap.

use crate::delivery::DeliveryChannel;
use crate::error::{Error, Result};
use crate::harvest::NewsBackend;
use crate::models::Counters;
use crate::scheduler::{Clock, CycleReport, Publisher};
use crate::store::StateStore;
use crate::utils::random_duration;
use rand::{Rng, rng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

struct PublishRequest {
    count: usize,
    reply: oneshot::Sender<CycleReport>,
}

type CounterFn = dyn Fn() -> Counters + Send + Sync;

/// Cloneable entry point to the publish worker.
#[derive(Clone)]
pub struct PublishHandle {
    tx: mpsc::Sender<PublishRequest>,
    counters: Arc<CounterFn>,
}

impl PublishHandle {
    /// Queue a cycle for `count` posts and wait for its report.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceClosed`] when the worker is gone.
    pub async fn request(&self, count: usize) -> Result<CycleReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublishRequest { count, reply })
            .await
            .map_err(|_| Error::ServiceClosed)?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    /// Queue a cycle only if the queue slot is free.
    ///
    /// Returns `None` without waiting when another cycle is already queued or
    /// the worker is gone.
    pub async fn try_request(&self, count: usize) -> Option<CycleReport> {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(PublishRequest { count, reply }) {
            Ok(()) => rx.await.ok(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Publish queue busy; skipping");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => None,
        }
    }

    pub fn counters(&self) -> Counters {
        (self.counters)()
    }
}

/// Start the worker that owns `publisher`.
///
/// The worker exits once every handle has been dropped.
pub fn spawn<B, C, S, K>(publisher: Publisher<B, C, S, K>) -> (PublishHandle, JoinHandle<()>)
where
    B: NewsBackend + 'static,
    C: DeliveryChannel + 'static,
    S: StateStore + 'static,
    K: Clock + 'static,
{
    let publisher = Arc::new(publisher);
    let (tx, mut rx) = mpsc::channel::<PublishRequest>(1);

    let counters: Arc<CounterFn> = {
        let publisher = Arc::clone(&publisher);
        Arc::new(move || publisher.counters())
    };

    let worker = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let report = publisher.run_cycle(request.count).await;
            if request.reply.send(report).is_err() {
                debug!("Requester went away before the cycle finished");
            }
        }
        info!("Publish worker stopped");
    });

    (PublishHandle { tx, counters }, worker)
}

/// Timing of the background drivers.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Pause between auto-poster cycles.
    pub auto_interval: (Duration, Duration),
    /// Posts requested per auto-poster cycle, inclusive.
    pub auto_batch: (usize, usize),
    /// Pause between prober ticks.
    pub probe_interval: (Duration, Duration),
    /// Chance that a prober tick requests a post.
    pub probe_chance: f64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            auto_interval: (Duration::from_secs(25 * 60), Duration::from_secs(40 * 60)),
            auto_batch: (1, 2),
            probe_interval: (Duration::from_secs(8 * 60), Duration::from_secs(10 * 60)),
            probe_chance: 0.3,
        }
    }
}

fn batch_size((lo, hi): (usize, usize)) -> usize {
    if hi <= lo { lo } else { rng().random_range(lo..=hi) }
}

/// Periodically request a small batch of posts. Runs until the worker stops.
#[instrument(level = "info", skip_all)]
pub async fn auto_poster(handle: PublishHandle, settings: DriverSettings) {
    loop {
        let count = batch_size(settings.auto_batch);
        match handle.request(count).await {
            Ok(report) => info!(
                requested = count,
                published = report.published,
                outcome = ?report.outcome,
                "Auto-post cycle done"
            ),
            Err(e) => {
                warn!(error = %e, "Auto-poster stopping");
                return;
            }
        }
        let pause = random_duration(settings.auto_interval.0, settings.auto_interval.1);
        info!(minutes = pause.as_secs() / 60, "Next auto-post scheduled");
        sleep(pause).await;
    }
}

/// Log liveness counters on every tick and occasionally request one post.
#[instrument(level = "info", skip_all)]
pub async fn keep_alive_prober(handle: PublishHandle, settings: DriverSettings) {
    loop {
        let counters = handle.counters();
        info!(
            sources = counters.sources,
            total_published = counters.total_published,
            published_today = counters.published_today,
            "Alive"
        );
        let roll: f64 = rng().random();
        if roll < settings.probe_chance {
            info!("Prober requesting a post");
            if let Some(report) = handle.try_request(1).await {
                debug!(published = report.published, outcome = ?report.outcome, "Prober cycle done");
            }
        }
        if handle.tx.is_closed() {
            warn!("Prober stopping");
            return;
        }
        sleep(random_duration(settings.probe_interval.0, settings.probe_interval.1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateItem;
    use crate::scheduler::{CycleOutcome, PublisherConfig};
    use crate::state::PublisherState;
    use crate::store::JsonFileStore;
    use crate::delivery::DryRunChannel;
    use chrono::{DateTime, TimeZone, Utc};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowBackend {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl NewsBackend for SlowBackend {
        fn source_count(&self) -> usize {
            1
        }

        async fn harvest(&self) -> Vec<CandidateItem> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Vec::new()
        }

        async fn fetch_article(&self, _url: &str) -> Option<String> {
            None
        }

        async fn download_image(&self, _url: &str) -> Option<PathBuf> {
            None
        }
    }

    struct Noon;

    impl Clock for Noon {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
        }
    }

    fn start(dir: &Path, peak: Arc<AtomicUsize>) -> (PublishHandle, JoinHandle<()>) {
        let placeholder = dir.join("placeholder.jpg");
        std::fs::write(&placeholder, b"x").unwrap();
        let backend = SlowBackend {
            running: Arc::new(AtomicUsize::new(0)),
            peak,
        };
        let store = JsonFileStore::new(dir.join("posted.json")).with_env_snapshot(None);
        let publisher = Publisher::new(
            backend,
            DryRunChannel,
            store,
            PublisherConfig::new("@channel", placeholder),
            PublisherState::default(),
        )
        .with_clock(Noon);
        spawn(publisher)
    }

    #[tokio::test]
    async fn test_cycles_never_overlap() {
        let tmp = tempfile::tempdir().unwrap();
        let peak = Arc::new(AtomicUsize::new(0));
        let (handle, _worker) = start(tmp.path(), Arc::clone(&peak));

        let requests = (0..4).map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.request(1).await })
        });
        for joined in futures::future::join_all(requests).await {
            let report = joined.unwrap().unwrap();
            assert_eq!(report.outcome, CycleOutcome::NoCandidates);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_counters_and_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let (handle, worker) = start(tmp.path(), Arc::new(AtomicUsize::new(0)));
        assert_eq!(handle.counters().sources, 1);
        assert_eq!(handle.counters().total_published, 0);

        let probe = handle.clone();
        drop(handle);
        assert!(probe.try_request(1).await.is_some());
        drop(probe);
        worker.await.unwrap();
    }

    #[test]
    fn test_batch_size_range() {
        for _ in 0..50 {
            let n = batch_size((1, 2));
            assert!((1..=2).contains(&n));
        }
        assert_eq!(batch_size((3, 3)), 3);
    }
}
