//! Heuristic text normalization for harvested news.
//!
//! Every function here is a pure `&str -> String` stage so the extractor and
//! the formatter can chain them: boilerplate filter, sentence dedup, title
//! echo strip, truncation. None of them fail; when a stage cannot do anything
//! useful it hands back its input.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Sentences shorter than this (in normalized characters) are never judged
/// by token overlap, and title patterns must be longer than this to be used.
pub const MIN_JUDGED_CHARS: usize = 20;

/// Outlet names scrubbed from titles and bodies.
pub const OUTLET_TOKENS: &[&str] = &[
    "INTERFAX.RU",
    "РИА Новости",
    "ТАСС",
    "Lenta.ru",
    "Rambler",
    "Фонтанка.ру",
    "78.ру",
    "Канал 7",
    "Петербург2",
    "ДП",
];

/// Substrings that mark a paragraph as page furniture rather than story text.
pub const BOILERPLATE_MARKERS: &[&str] = &[
    "©",
    "Фото:",
    "Источник:",
    "Читайте также:",
    "Редакция",
    "Комментарии",
    "Подпишитесь",
    "Поделиться",
    "Следите за",
    "Rambler",
    "ТАСС",
    "Lenta.ru",
    "РИА Новости",
    "INTERFAX.RU",
    "https://",
    "http://",
    "www.",
];

static RE_SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("sentence regex"));
static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("url regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static RE_INLINE_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\n]+").expect("inline whitespace regex"));
static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank line regex"));
static RE_OUTLETS: Lazy<Regex> = Lazy::new(|| {
    let alternatives = OUTLET_TOKENS
        .iter()
        .map(|token| {
            token
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s*")
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")).expect("outlet regex")
});

/// Tunable thresholds for the duplicate heuristics.
///
/// The overlap ratios have no derivation behind them beyond "works on the
/// feeds we read"; they are configuration so they can be tuned per deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerParams {
    /// Enables overlap-based sentence dedup and title-echo paragraph drops.
    pub strict: bool,
    /// Token overlap above which two long sentences count as duplicates.
    pub sentence_overlap: f64,
    /// Share of title tokens above which a paragraph counts as a title echo.
    pub title_overlap: f64,
}

impl Default for NormalizerParams {
    fn default() -> Self {
        Self {
            strict: false,
            sentence_overlap: 0.6,
            title_overlap: 0.7,
        }
    }
}

impl NormalizerParams {
    pub fn with_strict(self, strict: bool) -> Self {
        Self { strict, ..self }
    }
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Collapse every whitespace run (newlines included) to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WS.replace_all(text, " ").trim().to_string()
}

/// Keep at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Remove raw URLs.
pub fn strip_urls(text: &str) -> String {
    RE_URL.replace_all(text, "").into_owned()
}

/// Remove known outlet names.
pub fn strip_outlets(text: &str) -> String {
    RE_OUTLETS.replace_all(text, "").into_owned()
}

/// Whether a block contains any boilerplate marker.
pub fn has_boilerplate(text: &str) -> bool {
    BOILERPLATE_MARKERS.iter().any(|marker| text.contains(marker))
}

fn signature(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

/// Remove repeated sentences.
///
/// Exact repeats (case and whitespace insensitive) are always dropped. With
/// `params.strict`, a sentence of at least [`MIN_JUDGED_CHARS`] characters is
/// also dropped when it shares more than `params.sentence_overlap` of its
/// tokens with any earlier long sentence, dropped ones included. If the cleanup leaves fewer than 20
/// words out of an input of more than 30, the input is returned unchanged.
pub fn normalize_duplicates(text: &str, params: &NormalizerParams) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut long_sentences: Vec<HashSet<String>> = Vec::new();
    let mut kept: Vec<&str> = Vec::new();

    for sentence in RE_SENTENCE_END
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let sig = signature(sentence);
        if !seen.insert(sig.clone()) {
            continue;
        }
        if params.strict && sig.chars().count() >= MIN_JUDGED_CHARS {
            let toks = tokens(&sig);
            let repeats = long_sentences
                .iter()
                .any(|prev| overlap(prev, &toks) > params.sentence_overlap);
            long_sentences.push(toks);
            if repeats {
                continue;
            }
        }
        kept.push(sentence);
    }

    let cleaned = if kept.is_empty() {
        String::new()
    } else {
        format!("{}.", kept.join(". "))
    };

    if word_count(&cleaned) < 20 && word_count(text) > 30 {
        return text.to_string();
    }
    cleaned
}

fn echo_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    if body.is_empty() {
        return None;
    }
    // Word edges only where the pattern itself starts or ends with a word
    // character; the trailing run never crosses a line break.
    let edge = |c: Option<char>| {
        if c.is_some_and(|c| c.is_alphanumeric() || c == '_') { r"\b" } else { "" }
    };
    let lead = edge(pattern.trim().chars().next());
    let tail = edge(pattern.trim().chars().last());
    Regex::new(&format!(r"(?i){lead}(?:{body}{tail}(?:[^\S\n]|[.!?,;:…])*)+")).ok()
}

fn tidy_paragraphs(text: &str) -> String {
    RE_BLANK_LINES
        .split(text)
        .map(|para| {
            RE_INLINE_WS
                .replace_all(para, " ")
                .trim()
                .trim_start_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
                .trim()
                .to_string()
        })
        .filter(|para| !para.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Remove near-verbatim repeats of `title` from `text`.
///
/// Candidate patterns are the title itself, the title without periods, the
/// title without commas and, for titles over five words, its first seven
/// words. Patterns of [`MIN_JUDGED_CHARS`] normalized characters or fewer are
/// skipped.
pub fn strip_title_echo(text: &str, title: &str) -> String {
    let title = title.trim();
    if text.trim().is_empty() || title.is_empty() {
        return text.to_string();
    }

    let mut patterns = vec![
        title.to_string(),
        title.replace('.', ""),
        title.replace(',', ""),
    ];
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() > 5 {
        patterns.push(words[..words.len().min(7)].join(" "));
    }

    let mut tried = HashSet::new();
    let mut out = text.to_string();
    let mut changed = false;
    for pattern in patterns {
        let sig = signature(&pattern);
        if sig.chars().count() <= MIN_JUDGED_CHARS || !tried.insert(sig) {
            continue;
        }
        if let Some(re) = echo_regex(&pattern) {
            if re.is_match(&out) {
                out = re.replace_all(&out, "").into_owned();
                changed = true;
            }
        }
    }

    if changed { tidy_paragraphs(&out) } else { out }
}

/// Whether `text` shares more than `threshold` of the title's tokens.
pub fn similarity_to_title(text: &str, title: &str, threshold: f64) -> bool {
    let title_tokens = tokens(title);
    if title_tokens.is_empty() {
        return false;
    }
    let text_tokens = tokens(text);
    let shared = title_tokens.intersection(&text_tokens).count();
    shared as f64 / title_tokens.len() as f64 > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_duplicate_sentence_removed() {
        let out = normalize_duplicates(
            "Снег идёт. Снег идёт. Город готовится к зиме.",
            &NormalizerParams::default(),
        );
        assert_eq!(out.matches("Снег идёт").count(), 1);
        assert!(out.contains("Город готовится к зиме."));
        assert_eq!(out, "Снег идёт. Город готовится к зиме.");
    }

    #[test]
    fn test_duplicate_detection_ignores_case_and_spacing() {
        let out = normalize_duplicates(
            "Мост   закрыт! мост закрыт? Движение перекрыто.",
            &NormalizerParams::default(),
        );
        assert_eq!(out, "Мост   закрыт. Движение перекрыто.");
    }

    #[test]
    fn test_empty_text_passes_through() {
        assert_eq!(normalize_duplicates("", &NormalizerParams::default()), "");
        assert_eq!(normalize_duplicates("  ", &NormalizerParams::default()), "  ");
    }

    #[test]
    fn test_overaggressive_cleanup_is_undone() {
        // 35 words that collapse to a single short sentence.
        let text = "Один два три четыре пять. ".repeat(7);
        let out = normalize_duplicates(&text, &NormalizerParams::default());
        assert_eq!(out, text);
    }

    #[test]
    fn test_strict_overlap_dedup() {
        let text = "Губернатор подписал указ о строительстве новой станции метро. \
                    Губернатор подписал указ о строительстве станции метро в Купчино. \
                    Работы начнутся весной.";
        let lenient = normalize_duplicates(text, &NormalizerParams::default());
        assert!(lenient.contains("Купчино"));

        let strict = normalize_duplicates(text, &NormalizerParams::default().with_strict(true));
        assert_eq!(
            strict,
            "Губернатор подписал указ о строительстве новой станции метро. Работы начнутся весной."
        );
    }

    #[test]
    fn test_strict_overlap_compares_against_dropped_sentences() {
        // The third sentence only resembles the second, which is itself dropped.
        let text = "Власти города открыли новую станцию метро. \
                    Власти города открыли станцию метро вчера вечером. \
                    Станцию метро открыли вчера вечером при гостях. \
                    Пассажиры довольны.";
        let strict = normalize_duplicates(text, &NormalizerParams::default().with_strict(true));
        assert_eq!(strict, "Власти города открыли новую станцию метро. Пассажиры довольны.");
    }

    #[test]
    fn test_short_sentences_never_judged_by_overlap() {
        let text = "Мост закрыт сегодня. Мост закрыт завтра. Конец.";
        let out = normalize_duplicates(text, &NormalizerParams::default().with_strict(true));
        assert_eq!(out, "Мост закрыт сегодня. Мост закрыт завтра. Конец.");
    }

    #[test]
    fn test_title_echo_stripped() {
        let body = "Мост закрыт на ремонт. Мост закрыт на ремонт. Движение перекрыто до пятницы.";
        let out = strip_title_echo(body, "Мост закрыт на ремонт");
        assert_eq!(out, "Движение перекрыто до пятницы.");
    }

    #[test]
    fn test_title_echo_keeps_paragraphs() {
        let body = "Мост закрыт на ремонт.\n\nПервый абзац новости.\n\nВторой абзац новости.";
        let out = strip_title_echo(body, "Мост закрыт на ремонт");
        assert_eq!(out, "Первый абзац новости.\n\nВторой абзац новости.");
    }

    #[test]
    fn test_title_echo_respects_word_edges() {
        let body = "Мост закрыт на ремонтные работы до конца недели.";
        assert_eq!(strip_title_echo(body, "Мост закрыт на ремонт"), body);

        let body = "Разводной Мост закрыт на ремонт до пятницы.";
        assert_eq!(strip_title_echo(body, "Мост закрыт на ремонт"), "Разводной до пятницы.");
    }

    #[test]
    fn test_title_echo_at_paragraph_end_keeps_break() {
        let body = "Первый абзац про Мост закрыт на ремонт\n\nВторой абзац новости.";
        let out = strip_title_echo(body, "Мост закрыт на ремонт");
        assert_eq!(out, "Первый абзац про\n\nВторой абзац новости.");
    }

    #[test]
    fn test_short_title_is_not_stripped() {
        let body = "Снег идёт. Снег идёт снова.";
        assert_eq!(strip_title_echo(body, "Снег идёт"), body);
    }

    #[test]
    fn test_title_echo_matches_title_without_commas() {
        let title = "Мост закрыт, движение перекрыто до пятницы";
        let body = "Мост закрыт движение перекрыто до пятницы. Объезд через набережную.";
        let out = strip_title_echo(body, title);
        assert_eq!(out, "Объезд через набережную.");
    }

    #[test]
    fn test_similarity_to_title() {
        let title = "Мост закрыт на ремонт";
        assert!(similarity_to_title("Сегодня мост закрыт на ремонт", title, 0.7));
        assert!(!similarity_to_title("Движение перекрыто до пятницы", title, 0.7));
        assert!(!similarity_to_title("anything", "", 0.7));
    }

    #[test]
    fn test_strip_urls_and_outlets() {
        let text = "Новость дня https://lenta.ru/news/1 сообщает ТАСС и РИА  Новости www.ria.ru";
        let cleaned = collapse_whitespace(&strip_outlets(&strip_urls(text)));
        assert_eq!(cleaned, "Новость дня сообщает и");
    }

    #[test]
    fn test_boilerplate_markers() {
        assert!(has_boilerplate("© 2024 Все права защищены"));
        assert!(has_boilerplate("Читайте также: другие новости"));
        assert!(!has_boilerplate("Обычный абзац текста новости"));
    }

    #[test]
    fn test_truncate_chars_is_char_based() {
        assert_eq!(truncate_chars("Привет", 3), "При");
        assert_eq!(word_count("  один  два\nтри "), 3);
    }
}
