//! Data models for harvested news items and the posts built from them.
//!
//! This module defines the core data structures used throughout the relay:
//! - [`CandidateItem`]: A raw entry harvested from a feed
//! - [`PreparedPost`]: A formatted post with its image, ready to hand to a channel
//! - [`PostImage`]: Which image a post carries and who owns the file
//! - [`FormatMode`]: Compact or extended formatting presets
//! - [`Counters`]: Read-only counters for liveness monitoring

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A news item harvested from a feed during one cycle.
///
/// Candidates are rebuilt on every harvest and never persisted. The
/// [`story_key`](CandidateItem::story_key) is what ties an item to the
/// durable published set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// The headline as published by the feed.
    pub title: String,
    /// Link to the full article.
    pub link: String,
    /// Feed-provided summary with markup stripped. May be empty.
    pub description: String,
    /// The feed URL this item came from.
    pub source: String,
    /// Absolute URL of an image for the item, if the feed or page offered one.
    pub image_url: Option<String>,
}

impl CandidateItem {
    /// Deduplication identity: the link if present, otherwise the title.
    pub fn story_key(&self) -> String {
        story_key(&self.link, &self.title)
    }
}

/// Compute a story key from a link and a title.
pub fn story_key(link: &str, title: &str) -> String {
    let link = link.trim();
    if link.is_empty() {
        title.trim().to_string()
    } else {
        link.to_string()
    }
}

/// The image attached to a prepared post.
///
/// Only [`PostImage::Downloaded`] files belong to the pipeline; the
/// placeholder is an operator-provided asset and must outlive every post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostImage {
    /// A temporary file downloaded for this post. Deleted after sending.
    Downloaded(PathBuf),
    /// The shared fallback image. Never deleted.
    Placeholder(PathBuf),
}

impl PostImage {
    pub fn path(&self) -> &Path {
        match self {
            PostImage::Downloaded(path) | PostImage::Placeholder(path) => path,
        }
    }

    /// Whether the pipeline owns this file and must clean it up.
    pub fn is_temporary(&self) -> bool {
        matches!(self, PostImage::Downloaded(_))
    }
}

/// A post ready for the delivery channel.
#[derive(Debug, Clone)]
pub struct PreparedPost {
    /// Original headline, used for logging.
    pub title: String,
    /// The final formatted message text.
    pub body_text: String,
    /// Link of the underlying story.
    pub source_link: String,
    /// Image to attach, if any.
    pub image: Option<PostImage>,
    /// Word count of `body_text`.
    pub word_count: usize,
}

/// Formatting preset.
///
/// `Compact` mirrors a short two-to-three paragraph post. `Extended` pulls
/// more of the article and applies the stricter duplicate filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FormatMode {
    #[default]
    Compact,
    Extended,
}

impl FormatMode {
    /// Number of qualifying blocks the extractor keeps.
    pub fn extract_blocks(self) -> usize {
        match self {
            FormatMode::Compact => 3,
            FormatMode::Extended => 8,
        }
    }

    /// Extracted text must exceed this many words to be preferred over the
    /// feed description.
    pub fn body_threshold(self) -> usize {
        match self {
            FormatMode::Compact => 40,
            FormatMode::Extended => 60,
        }
    }

    /// Paragraphs of extracted text carried into the post body.
    pub fn body_paragraphs(self) -> usize {
        match self {
            FormatMode::Compact => 3,
            FormatMode::Extended => 4,
        }
    }

    /// Whether the stricter similarity-based filters apply.
    pub fn strict(self) -> bool {
        matches!(self, FormatMode::Extended)
    }
}

/// Counters exposed for liveness monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Number of configured sources.
    pub sources: usize,
    /// Stories published since the store was created.
    pub total_published: usize,
    /// Stories published in the current quota window.
    pub published_today: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(link: &str, title: &str) -> CandidateItem {
        CandidateItem {
            title: title.to_string(),
            link: link.to_string(),
            description: String::new(),
            source: "https://example.com/rss".to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_story_key_prefers_link() {
        let it = item("https://example.com/a", "Title");
        assert_eq!(it.story_key(), "https://example.com/a");
    }

    #[test]
    fn test_story_key_falls_back_to_title() {
        let it = item("   ", " Заголовок ");
        assert_eq!(it.story_key(), "Заголовок");
    }

    #[test]
    fn test_post_image_ownership() {
        let tmp = PostImage::Downloaded(PathBuf::from("/tmp/a.jpg"));
        let placeholder = PostImage::Placeholder(PathBuf::from("./static/placeholder.jpg"));
        assert!(tmp.is_temporary());
        assert!(!placeholder.is_temporary());
        assert_eq!(placeholder.path(), Path::new("./static/placeholder.jpg"));
    }

    #[test]
    fn test_format_mode_presets() {
        assert_eq!(FormatMode::Compact.extract_blocks(), 3);
        assert_eq!(FormatMode::Extended.extract_blocks(), 8);
        assert!(FormatMode::Extended.strict());
        assert!(!FormatMode::Compact.strict());
    }

    #[test]
    fn test_counters_serialization() {
        let counters = Counters {
            sources: 11,
            total_published: 42,
            published_today: 3,
        };
        let json = serde_json::to_string(&counters).unwrap();
        assert!(json.contains("\"total_published\":42"));
    }
}
