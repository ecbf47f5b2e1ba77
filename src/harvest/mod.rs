//! Feed harvesting.
//!
//! Queries every configured source concurrently, parses the listings into
//! [`CandidateItem`]s, and resolves an image URL per entry (from the feed
//! itself or, failing that, the article page's `og:image`). One failing
//! source never affects the others.
//!
//! The [`NewsBackend`] trait is the seam the scheduler talks to; the
//! production implementation is [`HttpBackend`].

pub mod images;
pub mod rss;

use crate::error::{Error, Result};
use crate::models::CandidateItem;
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Feeds polled when no other list is configured.
pub const DEFAULT_SOURCES: &[&str] = &[
    "https://lenta.ru/rss/news",
    "https://tass.ru/rss/v2.xml",
    "https://news.rambler.ru/rss/world/",
    "https://www.fontanka.ru/fontanka.rss",
    "https://78.ru/rss",
    "https://kanal7.ru/rss",
    "https://peterburg2.ru/rss",
    "https://www.dp.ru/rss",
    "https://ria.ru/export/rss2/archive/index.xml",
    "https://www.interfax.ru/rss.asp",
    "https://www.kommersant.ru/RSS/news.xml",
];

/// Browser-like agent string; several outlets refuse unknown clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Tunables for one harvest.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Entries read from each feed.
    pub per_source_limit: usize,
    /// Delay between the start of consecutive source requests.
    pub stagger: Duration,
    pub feed_timeout: Duration,
    pub page_timeout: Duration,
    pub image_timeout: Duration,
    /// Fetch the article page to look for `og:image` when the feed has no image.
    pub page_image_lookup: bool,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            per_source_limit: 5,
            stagger: Duration::from_secs(1),
            feed_timeout: Duration::from_secs(15),
            page_timeout: Duration::from_secs(8),
            image_timeout: Duration::from_secs(30),
            page_image_lookup: true,
        }
    }
}

/// Everything the scheduler needs from the outside world to build posts.
///
/// None of these operations fail from the caller's point of view: errors are
/// logged and turned into empty results.
pub trait NewsBackend: Send + Sync {
    /// Number of configured sources.
    fn source_count(&self) -> usize;

    /// Query all sources and return the union of their entries, one per story.
    fn harvest(&self) -> impl Future<Output = Vec<CandidateItem>> + Send;

    /// Fetch an article page. `None` on any failure.
    fn fetch_article(&self, url: &str) -> impl Future<Output = Option<String>> + Send;

    /// Download an image into the work directory and return its path.
    fn download_image(&self, url: &str) -> impl Future<Output = Option<PathBuf>> + Send;
}

/// HTTP implementation of [`NewsBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    sources: Vec<String>,
    settings: HarvestSettings,
    work_dir: PathBuf,
}

impl HttpBackend {
    /// Build a backend over `sources`, storing downloaded images in `work_dir`.
    ///
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be constructed.
    pub fn new(sources: Vec<String>, settings: HarvestSettings, work_dir: PathBuf) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            sources,
            settings,
            work_dir,
        })
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<Response> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        Ok(self.get(url, timeout).await?.text().await?)
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch_source(&self, source: &str) -> Result<Vec<CandidateItem>> {
        let body = self.get_text(source, self.settings.feed_timeout).await?;
        let entries = rss::parse_feed(&body, self.settings.per_source_limit)?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let image_url = match entry.image_url {
                Some(url) => Some(url),
                None if self.settings.page_image_lookup => self.page_image(&entry.link).await,
                None => None,
            };
            items.push(CandidateItem {
                title: entry.title,
                link: entry.link,
                description: entry.description,
                source: source.to_string(),
                image_url,
            });
        }
        info!(count = items.len(), "Harvested source");
        Ok(items)
    }

    async fn page_image(&self, link: &str) -> Option<String> {
        match self.get_text(link, self.settings.page_timeout).await {
            Ok(html) => images::find_og_image(&html),
            Err(e) => {
                debug!(%link, error = %e, "Page image lookup failed");
                None
            }
        }
    }

    async fn try_download(&self, url: &str) -> Result<Option<PathBuf>> {
        let response = self.get(url, self.settings.image_timeout).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        if !images::is_usable_image(content_type.as_deref(), bytes.len()) {
            debug!(
                %url,
                content_type = content_type.as_deref().unwrap_or("-"),
                bytes = bytes.len(),
                "Image rejected"
            );
            return Ok(None);
        }
        images::store_image(&self.work_dir, content_type.as_deref(), &bytes)
            .await
            .map(Some)
    }
}

impl NewsBackend for HttpBackend {
    fn source_count(&self) -> usize {
        self.sources.len()
    }

    #[instrument(level = "info", skip(self), fields(sources = self.sources.len()))]
    async fn harvest(&self) -> Vec<CandidateItem> {
        let stagger = self.settings.stagger;
        let batches: Vec<Vec<CandidateItem>> = stream::iter(self.sources.clone().into_iter().enumerate())
            .map(move |(i, source)| async move {
                sleep(stagger * i as u32).await;
                match self.fetch_source(&source).await {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(%source, error = %e, "Source failed; skipping");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.sources.len().max(1))
            .collect()
            .await;

        let items = batches
            .into_iter()
            .flatten()
            .unique_by(CandidateItem::story_key)
            .collect::<Vec<_>>();
        info!(count = items.len(), "Harvest complete");
        items
    }

    async fn fetch_article(&self, url: &str) -> Option<String> {
        match self.get_text(url, self.settings.page_timeout).await {
            Ok(html) => Some(html),
            Err(e) => {
                warn!(url = %truncate_for_log(url, 120), error = %e, "Article fetch failed");
                None
            }
        }
    }

    async fn download_image(&self, url: &str) -> Option<PathBuf> {
        match self.try_download(url).await {
            Ok(path) => path,
            Err(e) => {
                warn!(url = %truncate_for_log(url, 120), error = %e, "Image download failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> HarvestSettings {
        HarvestSettings {
            stagger: Duration::ZERO,
            ..HarvestSettings::default()
        }
    }

    fn feed(base: &str, items: &[(&str, &str)]) -> String {
        let body = items
            .iter()
            .map(|(title, slug)| {
                format!("<item><title>{title}</title><link>{base}/news/{slug}</link></item>")
            })
            .collect::<String>();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel>{body}</channel></rss>"#)
    }

    async fn mount(server: &MockServer, at: &str, status: u16, body: String, mime: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, mime))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_harvest_unions_sources_and_skips_failures() {
        let server = MockServer::start().await;
        let base = server.uri();
        mount(&server, "/a.rss", 200, feed(&base, &[("Первая", "1"), ("Вторая", "2")]), "application/rss+xml").await;
        mount(&server, "/b.rss", 200, feed(&base, &[("Вторая снова", "2"), ("Третья", "3")]), "application/rss+xml").await;
        mount(&server, "/broken.rss", 500, String::new(), "text/plain").await;

        let tmp = tempfile::tempdir().unwrap();
        let backend = HttpBackend::new(
            vec![
                format!("{base}/a.rss"),
                format!("{base}/broken.rss"),
                format!("{base}/b.rss"),
            ],
            HarvestSettings {
                page_image_lookup: false,
                ..settings()
            },
            tmp.path().to_path_buf(),
        )
        .unwrap();

        let items = backend.harvest().await;
        let mut links = items.iter().map(|i| i.link.clone()).collect::<Vec<_>>();
        links.sort();
        assert_eq!(
            links,
            vec![
                format!("{base}/news/1"),
                format!("{base}/news/2"),
                format!("{base}/news/3"),
            ]
        );
        assert_eq!(backend.source_count(), 3);
    }

    #[tokio::test]
    async fn test_harvest_falls_back_to_og_image() {
        let server = MockServer::start().await;
        let base = server.uri();
        mount(&server, "/feed", 200, feed(&base, &[("С картинкой", "7")]), "application/rss+xml").await;
        let page = format!(r#"<html><head><meta property="og:image" content="{base}/img/7.jpg"></head></html>"#);
        mount(&server, "/news/7", 200, page, "text/html").await;

        let tmp = tempfile::tempdir().unwrap();
        let backend =
            HttpBackend::new(vec![format!("{base}/feed")], settings(), tmp.path().to_path_buf()).unwrap();
        let items = backend.harvest().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].image_url, Some(format!("{base}/img/7.jpg")));
        assert_eq!(items[0].source, format!("{base}/feed"));
    }

    #[tokio::test]
    async fn test_download_image_checks_type_and_size() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/big.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![7u8; 20_000], "image/jpeg"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tiny.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![7u8; 100], "image/jpeg"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![7u8; 20_000], "text/html"))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let backend = HttpBackend::new(Vec::new(), settings(), tmp.path().to_path_buf()).unwrap();

        let stored = backend.download_image(&format!("{base}/big.jpg")).await.unwrap();
        assert!(stored.starts_with(tmp.path()));
        assert_eq!(std::fs::metadata(&stored).unwrap().len(), 20_000);

        assert!(backend.download_image(&format!("{base}/tiny.jpg")).await.is_none());
        assert!(backend.download_image(&format!("{base}/page.jpg")).await.is_none());
        assert!(backend.download_image(&format!("{base}/missing.jpg")).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_article_non_success_is_none() {
        let server = MockServer::start().await;
        let base = server.uri();
        mount(&server, "/ok", 200, "<p>текст</p>".to_string(), "text/html").await;
        mount(&server, "/gone", 404, String::new(), "text/html").await;

        let tmp = tempfile::tempdir().unwrap();
        let backend = HttpBackend::new(Vec::new(), settings(), tmp.path().to_path_buf()).unwrap();
        assert_eq!(
            backend.fetch_article(&format!("{base}/ok")).await.as_deref(),
            Some("<p>текст</p>")
        );
        assert!(backend.fetch_article(&format!("{base}/gone")).await.is_none());
    }
}
