//! Image URL resolution and download checks.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};
use url::Url;

use crate::error::Result;
use crate::utils::unique_temp_path;

/// Extensions accepted for per-item images.
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

/// Downloads at or below this size are treated as placeholders or tracking
/// pixels and discarded.
pub const MIN_IMAGE_BYTES: usize = 10 * 1024;

static OG_IMAGE: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).ok());

/// Normalize and validate a candidate image URL.
///
/// Protocol-relative URLs get `https:`. Only absolute http(s) URLs whose path
/// ends in a known image extension are accepted; query strings are allowed.
pub fn accept_image_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let absolute = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
        .then(|| url.to_string())
}

/// Find an acceptable Open Graph image on an article page.
pub fn find_og_image(html: &str) -> Option<String> {
    let selector = OG_IMAGE.as_ref()?;
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(|meta| meta.value().attr("content"))
        .find_map(accept_image_url)
}

/// Whether a response looks like a real image worth attaching.
pub fn is_usable_image(content_type: Option<&str>, len: usize) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("image")) && len > MIN_IMAGE_BYTES
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type.map(|ct| ct.to_ascii_lowercase()) {
        Some(ct) if ct.contains("png") => "png",
        Some(ct) if ct.contains("webp") => "webp",
        _ => "jpg",
    }
}

/// Write downloaded image bytes to a fresh temporary file under `dir`.
#[instrument(level = "debug", skip(bytes), fields(bytes = bytes.len()))]
pub async fn store_image(dir: &Path, content_type: Option<&str>, bytes: &[u8]) -> Result<PathBuf> {
    let path = unique_temp_path(dir, "news_image", extension_for(content_type));
    fs::write(&path, bytes).await?;
    debug!(path = %path.display(), "Stored downloaded image");
    Ok(path)
}
