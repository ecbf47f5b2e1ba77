//! RSS 2.0 / Atom listing parser.
//!
//! Feeds are read with the streaming `quick-xml` reader rather than serde so
//! that namespaced media elements (`media:content`, `media:thumbnail`) and
//! Atom `link href` attributes can be picked up without a schema per feed.
//! A feed that breaks half way through still yields the entries read before
//! the error.

use crate::error::{Error, Result};
use crate::harvest::images::accept_image_url;
use crate::text::collapse_whitespace;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use tracing::{debug, warn};

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));

/// One listing entry as read from a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// Plain-text summary, markup stripped.
    pub description: String,
    /// First acceptable image URL by element priority.
    pub image_url: Option<String>,
}

/// Where an image URL was found. Lower ranks win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ImageRank {
    Enclosure,
    MediaContent,
    MediaThumbnail,
    Image,
}

impl ImageRank {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"enclosure" => Some(Self::Enclosure),
            b"media:content" => Some(Self::MediaContent),
            b"media:thumbnail" => Some(Self::MediaThumbnail),
            b"image" => Some(Self::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    ImageUrl,
}

#[derive(Debug, Default)]
struct EntryBuilder {
    title: String,
    link: String,
    description: String,
    image_url_text: String,
    images: Vec<(ImageRank, String)>,
    in_image: bool,
}

impl EntryBuilder {
    fn push_text(&mut self, field: Field, text: &str) {
        match field {
            Field::Title => self.title.push_str(text),
            Field::Link => self.link.push_str(text),
            Field::Description => self.description.push_str(text),
            Field::ImageUrl => self.image_url_text.push_str(text),
        }
    }

    fn finish(mut self) -> Option<FeedEntry> {
        if !self.image_url_text.trim().is_empty() {
            let url = decode_entities(self.image_url_text.trim());
            self.images.push((ImageRank::Image, url));
        }
        let title = clean_markup(&self.title);
        let link = decode_entities(self.link.trim());
        if title.is_empty() || link.is_empty() {
            return None;
        }
        // Stable sort keeps document order within a rank.
        self.images.sort_by_key(|(rank, _)| *rank);
        let image_url = self
            .images
            .iter()
            .find_map(|(_, url)| accept_image_url(url));
        Some(FeedEntry {
            title,
            link,
            description: clean_markup(&self.description),
            image_url,
        })
    }
}

fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Decode entities, drop tags, collapse whitespace.
fn clean_markup(raw: &str) -> String {
    let decoded = decode_entities(raw);
    collapse_whitespace(&RE_TAGS.replace_all(&decoded, " "))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| decode_entities(&String::from_utf8_lossy(&a.value)))
}

/// Handle a start or empty tag inside an entry.
///
/// Returns the field whose text content should be captured, if any.
fn open_tag(entry: &mut EntryBuilder, e: &BytesStart<'_>) -> Option<Field> {
    let name = e.name();
    let name = name.as_ref();

    if let Some(rank) = ImageRank::from_tag(name) {
        if let Some(url) = attr(e, b"url") {
            entry.images.push((rank, url));
        }
        if rank == ImageRank::Image {
            entry.in_image = true;
        }
        return None;
    }

    match name {
        b"url" if entry.in_image => Some(Field::ImageUrl),
        _ if entry.in_image => None,
        b"title" => Some(Field::Title),
        b"link" => {
            // Atom puts the URL in an attribute.
            if let Some(href) = attr(e, b"href") {
                let rel = attr(e, b"rel");
                match rel.as_deref() {
                    None | Some("alternate") if entry.link.is_empty() => entry.link = href,
                    Some("enclosure") => entry.images.push((ImageRank::Enclosure, href)),
                    _ => {}
                }
                None
            } else {
                Some(Field::Link)
            }
        }
        b"description" | b"summary" | b"content" if entry.description.is_empty() => Some(Field::Description),
        _ => None,
    }
}

/// Parse the first `limit` entries of an RSS or Atom document.
///
/// Entries without a title or link still count toward `limit` and are then
/// dropped.
///
/// # Errors
///
/// Returns [`Error::Feed`] when the document is malformed before any entry
/// could be read.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;
    let mut read = 0usize;

    loop {
        if read >= limit {
            break;
        }
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    current = Some(EntryBuilder::default());
                    field = None;
                }
                _ => {
                    if let Some(entry) = current.as_mut() {
                        if let Some(f) = open_tag(entry, &e) {
                            field = Some(f);
                        }
                    }
                }
            },
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    open_tag(entry, &e);
                    // An empty <image/> has no children to wait for.
                    if e.name().as_ref() == b"image" {
                        entry.in_image = false;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push_text(f, &String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push_text(f, &String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push_text(f, &format!("&{};", String::from_utf8_lossy(&r)));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    read += 1;
                    if let Some(entry) = current.take().and_then(EntryBuilder::finish) {
                        entries.push(entry);
                    }
                    field = None;
                }
                b"image" => {
                    if let Some(entry) = current.as_mut() {
                        entry.in_image = false;
                    }
                    field = None;
                }
                b"title" | b"link" | b"description" | b"summary" | b"content" | b"url" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                if entries.is_empty() {
                    return Err(Error::Feed(format!(
                        "at byte {}: {e}",
                        reader.buffer_position()
                    )));
                }
                warn!(error = %e, parsed = entries.len(), "Feed truncated by parse error");
                break;
            }
            _ => {}
        }
    }

    debug!(count = entries.len(), "Parsed feed entries");
    Ok(entries)
}
