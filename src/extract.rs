//! Article body extraction.
//!
//! Turns a fetched article page into a handful of meaningful paragraphs.
//! Page furniture (scripts, navigation, footers, forms, embeds) is ignored,
//! the main content container is located by a priority list of selectors, and
//! the leaf text blocks inside it are filtered by length and boilerplate
//! markers before the title echo is stripped.

use crate::models::FormatMode;
use crate::text::{
    NormalizerParams, collapse_whitespace, has_boilerplate, similarity_to_title,
    strip_title_echo, truncate_chars, word_count,
};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Hard ceiling on extracted text, in characters.
pub const MAX_EXTRACT_CHARS: usize = 3000;

/// Extracted text under this many words gets the title prepended.
const MIN_STANDALONE_WORDS: usize = 50;

/// Elements whose text never counts as article content.
const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "aside", "header", "form", "button", "iframe",
];

/// Main-content selectors, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    ".article",
    ".content",
    ".news-content",
    ".post-content",
    ".text",
    ".news-text",
    ".story__content",
    ".b-article__content",
    ".js-article-content",
    "[class*=\"content\"]",
    "[class*=\"article\"]",
    "[class*=\"post\"]",
    "[class*=\"story\"]",
];

static CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});
static BODY: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());
static BLOCKS: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("p, div, h2, h3").ok());

fn is_stripped_tag(name: &str) -> bool {
    STRIPPED_TAGS.contains(&name)
}

/// True when the element or any of its ancestors is page furniture.
fn within_stripped(el: ElementRef<'_>) -> bool {
    is_stripped_tag(el.value().name())
        || el
            .ancestors()
            .any(|a| a.value().as_element().is_some_and(|e| is_stripped_tag(e.name())))
}

/// Text of an element, skipping anything nested in stripped tags.
fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .any(|a| a.value().as_element().is_some_and(|e| is_stripped_tag(e.name())));
        if !hidden {
            out.push_str(text);
        }
    }
    out
}

fn has_block_children(el: ElementRef<'_>) -> bool {
    el.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|child| matches!(child.value().name(), "p" | "div" | "h2" | "h3"))
}

fn main_container(document: &Html) -> ElementRef<'_> {
    CONTENT
        .iter()
        .find_map(|selector| document.select(selector).find(|el| !within_stripped(*el)))
        .or_else(|| {
            BODY.as_ref()
                .and_then(|selector| document.select(selector).next())
        })
        .unwrap_or_else(|| document.root_element())
}

/// A block worth keeping: long enough, wordy enough, not a link dump and
/// free of boilerplate markers.
pub fn is_meaningful(text: &str) -> bool {
    text.chars().count() > 40
        && word_count(text) > 8
        && !text.starts_with("http")
        && !has_boilerplate(text)
}

/// Extract the readable body of an article page.
///
/// Returns an empty string when nothing qualifies. The result holds at most
/// `mode.extract_blocks()` paragraphs separated by blank lines, has the title
/// echo removed, is prefixed with the title when shorter than 50 words, and
/// never exceeds [`MAX_EXTRACT_CHARS`] characters.
#[instrument(level = "debug", skip_all, fields(title = %truncate_for_log(title, 60)))]
pub fn extract(html: &str, title: &str, mode: FormatMode, params: &NormalizerParams) -> String {
    let Some(blocks_selector) = BLOCKS.as_ref() else {
        return String::new();
    };
    let document = Html::parse_document(html);
    let container = main_container(&document);

    let mut seen = HashSet::new();
    let mut blocks: Vec<String> = Vec::new();
    for el in container.select(blocks_selector) {
        if within_stripped(el) {
            continue;
        }
        // Wrapper divs repeat the text of their children; keep the leaves.
        if el.value().name() == "div" && has_block_children(el) {
            continue;
        }
        let text = collapse_whitespace(&visible_text(el));
        if !is_meaningful(&text) {
            continue;
        }
        if params.strict && similarity_to_title(&text, title, params.title_overlap) {
            continue;
        }
        if !seen.insert(text.clone()) {
            continue;
        }
        blocks.push(text);
        if blocks.len() >= mode.extract_blocks() {
            break;
        }
    }

    if blocks.is_empty() {
        debug!("No meaningful paragraphs found");
        return String::new();
    }

    let mut full_text = strip_title_echo(&blocks.join("\n\n"), title);
    if word_count(&full_text) < MIN_STANDALONE_WORDS {
        full_text = format!("{}\n\n{}", title.trim(), full_text)
            .trim()
            .to_string();
    }
    debug!(
        paragraphs = blocks.len(),
        words = word_count(&full_text),
        "Extracted article text"
    );
    truncate_chars(&full_text, MAX_EXTRACT_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PARA_ONE: &str = "Городские власти объявили о начале масштабного ремонта набережной, который продлится до конца осени.";
    const PARA_TWO: &str = "По словам представителей комитета, работы будут проводиться поэтапно, чтобы не перекрывать движение полностью.";
    const PARA_THREE: &str = "Жителей попросили заранее планировать маршруты и пользоваться общественным транспортом в часы пик.";
    const PARA_FOUR: &str = "Четвёртый абзац рассказывает о том, как подрядчик будет вывозить строительный мусор по ночам.";

    fn page(body: &str) -> String {
        format!("<html><head><title>t</title></head><body>{body}</body></html>")
    }

    #[test]
    fn test_extracts_article_paragraphs() {
        let html = page(&format!(
            r#"<nav><p>Меню сайта с очень длинным списком разделов, новостей, рубрик и прочего навигационного текста</p></nav>
               <article>
                 <h1>Заголовок</h1>
                 <p>{PARA_ONE}</p>
                 <p>Коротко.</p>
                 <p>Фото: пресс-служба администрации города, все права защищены и так далее по тексту</p>
                 <p>{PARA_TWO}</p>
                 <script>var x = "длинный скрипт, который не должен попасть в текст новости ни при каких условиях";</script>
                 <p>{PARA_THREE}</p>
                 <p>{PARA_FOUR}</p>
               </article>"#
        ));
        let out = extract(&html, "Ремонт набережной", FormatMode::Compact, &NormalizerParams::default());
        let expected = format!("Ремонт набережной\n\n{PARA_ONE}\n\n{PARA_TWO}\n\n{PARA_THREE}");
        assert_eq!(out, expected);
    }

    #[test]
    fn test_extended_mode_takes_more_blocks() {
        let html = page(&format!(
            "<article><p>{PARA_ONE}</p><p>{PARA_TWO}</p><p>{PARA_THREE}</p><p>{PARA_FOUR}</p></article>"
        ));
        let params = NormalizerParams::default().with_strict(true);
        let out = extract(&html, "Ремонт набережной", FormatMode::Extended, &params);
        assert!(out.contains(PARA_FOUR));
    }

    #[test]
    fn test_falls_back_to_body_and_skips_wrapper_divs() {
        let html = page(&format!(
            "<div id=\"main\"><div>{PARA_ONE}</div><div>{PARA_TWO}</div></div>"
        ));
        let out = extract(&html, "", FormatMode::Compact, &NormalizerParams::default());
        assert_eq!(out, format!("{PARA_ONE}\n\n{PARA_TWO}"));
    }

    #[test]
    fn test_strict_mode_drops_title_echo_paragraph() {
        let title = "Городские власти объявили о ремонте набережной";
        let echo = "Городские власти сегодня официально объявили о ремонте набережной в центре нашего города.";
        let html = page(&format!("<article><p>{echo}</p><p>{PARA_TWO}</p></article>"));
        let strict = NormalizerParams::default().with_strict(true);
        let out = extract(&html, title, FormatMode::Compact, &strict);
        assert!(!out.contains("сегодня официально"));
        assert!(out.contains(PARA_TWO));
    }

    #[test]
    fn test_nothing_meaningful_returns_empty() {
        let html = page("<article><p>Коротко.</p><p>https://example.com/very/long/link/that/should/not/count/as/text</p></article>");
        assert_eq!(
            extract(&html, "t", FormatMode::Compact, &NormalizerParams::default()),
            ""
        );
        assert_eq!(
            extract("", "t", FormatMode::Compact, &NormalizerParams::default()),
            ""
        );
    }

    #[test]
    fn test_output_is_bounded() {
        let long_para = "Очень длинное предложение о городских новостях и событиях недели. ".repeat(30);
        let html = page(&format!(
            "<article><p>{long_para}</p><p>{long_para} Второй.</p><p>{long_para} Третий.</p></article>"
        ));
        let out = extract(&html, "t", FormatMode::Compact, &NormalizerParams::default());
        assert_eq!(out.chars().count(), MAX_EXTRACT_CHARS);
    }

    #[test]
    fn test_is_meaningful() {
        assert!(is_meaningful(PARA_ONE));
        assert!(!is_meaningful("Слишком коротко"));
        assert!(!is_meaningful("© Все права защищены, перепечатка материалов запрещена без согласия редакции"));
    }
}
