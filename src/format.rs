//! Post formatting.
//!
//! Builds the final message from a headline, the feed description and the
//! extracted article text: a cleaned display title, a blank line, and a body
//! of short paragraphs, capped at [`MAX_POST_CHARS`] characters.

use crate::models::FormatMode;
use crate::text::{
    NormalizerParams, collapse_whitespace, normalize_duplicates, similarity_to_title,
    strip_outlets, strip_title_echo, strip_urls, truncate_chars, word_count,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Maximum length of a formatted post, in characters.
pub const MAX_POST_CHARS: usize = 3000;

/// Posts with fewer words than this are too thin to publish.
pub const MIN_PUBLISH_WORDS: usize = 40;

/// A sentence boundary at or after this character is preferred when cutting.
const CUT_WINDOW_START: usize = 2500;

const MAX_TITLE_CHARS: usize = 120;

/// Descriptions must exceed this many words to be used as the body.
const MIN_DESCRIPTION_WORDS: usize = 20;

static RE_DASH_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[–—]\s*[–—]+").expect("dash regex"));
static RE_DOT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s*\.+").expect("dot regex"));
static RE_SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?])\s+").expect("sentence break regex"));
static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank line regex"));

/// Clean a raw feed headline for display.
pub fn display_title(raw: &str, params: &NormalizerParams) -> String {
    let title = strip_outlets(&strip_urls(raw));
    let title = RE_DASH_RUN.replace_all(&title, "—");
    let title = RE_DOT_RUN.replace_all(&title, ".");
    let title = normalize_duplicates(&collapse_whitespace(&title), params);

    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.trim().to_string();
    }
    match title.split_once(". ") {
        Some((first, _)) if first.chars().count() < MAX_TITLE_CHARS => format!("{}.", first.trim()),
        _ => format!("{}...", truncate_chars(&title, MAX_TITLE_CHARS - 3).trim_end()),
    }
}

fn choose_body(
    title: &str,
    description: &str,
    extracted: &str,
    mode: FormatMode,
    params: &NormalizerParams,
) -> String {
    if word_count(extracted) > mode.body_threshold() {
        let body = extracted
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter(|p| !(params.strict && similarity_to_title(p, title, params.title_overlap)))
            .take(mode.body_paragraphs())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !body.is_empty() {
            return body;
        }
    }
    if word_count(description) > MIN_DESCRIPTION_WORDS {
        return description.to_string();
    }
    if extracted.trim().is_empty() {
        description.to_string()
    } else {
        extracted.to_string()
    }
}

/// Cut `text` down to [`MAX_POST_CHARS`].
///
/// Prefers the last sentence end (`.`, then `!`, then `?`, each followed by
/// whitespace) lying between characters 2500 and 3000. Without one, the text
/// is hard-cut and marked with `...`.
pub fn enforce_ceiling(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= MAX_POST_CHARS {
        return text.to_string();
    }

    for terminator in ['.', '!', '?'] {
        let boundary = (CUT_WINDOW_START..MAX_POST_CHARS - 1)
            .rev()
            .find(|&i| chars[i] == terminator && chars[i + 1].is_whitespace());
        if let Some(i) = boundary {
            debug!(cut_at = i + 1, "Truncated post at sentence boundary");
            return chars[..=i].iter().collect::<String>().trim_end().to_string();
        }
    }

    warn!(
        length = chars.len(),
        "No sentence boundary near the limit; hard-cutting post"
    );
    let mut out: String = chars[..MAX_POST_CHARS - 3].iter().collect();
    out.push_str("...");
    out
}

/// Compose the final post text.
///
/// The body is the extracted article when it is substantial, otherwise the
/// feed description. URLs, outlet names, repeated sentences and title echoes
/// are removed, and every sentence is followed by a blank line.
pub fn format_post(
    title: &str,
    description: &str,
    extracted: &str,
    mode: FormatMode,
    params: &NormalizerParams,
) -> String {
    let clean_title = display_title(title, params);

    let body = choose_body(&clean_title, description, extracted, mode, params);
    let body = strip_outlets(&strip_urls(&body));
    let body = normalize_duplicates(&body, params);
    let body = strip_title_echo(&body, &clean_title);
    let body = collapse_whitespace(&body);
    let body = RE_SENTENCE_BREAK.replace_all(&body, "${1}\n\n");

    let composed = format!("{clean_title}\n\n{body}");
    let composed = RE_BLANK_LINES.replace_all(&composed, "\n\n");
    enforce_ceiling(composed.trim())
}

/// Whether a formatted post carries enough text to publish.
pub fn is_publishable(text: &str) -> bool {
    word_count(text) >= MIN_PUBLISH_WORDS
}
