//! Canonical text form shared by descriptions and rendered pages.
//!
//! Both sides go through [`map_char`] so a description written with `—` and
//! `«»` still matches a page that uses `-` and `"`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ordinal::parse_number_token;

/// Result of mapping one source character into canonical form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mapped {
    /// Invisible character, contributes nothing.
    Skip,
    /// Any whitespace; runs collapse to a single space.
    Space,
    One(char),
    /// `…` expands to three dots.
    Ellipsis,
}

pub(crate) fn map_char(ch: char) -> Mapped {
    match ch {
        '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => Mapped::Skip,
        c if c.is_whitespace() => Mapped::Space,
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2039}' | '\u{203A}' | '\u{2032}'
        | '`' | '\u{00B4}' => Mapped::One('\''),
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{00AB}' | '\u{00BB}'
        | '\u{2033}' => Mapped::One('"'),
        '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => {
            Mapped::One('-')
        }
        '\u{2026}' => Mapped::Ellipsis,
        'ё' => Mapped::One('е'),
        'Ё' => Mapped::One('Е'),
        c => Mapped::One(c),
    }
}

/// Single-char lowercase used for case-insensitive comparison.
///
/// Keeps a 1:1 char mapping so folded offsets equal original offsets.
pub(crate) fn fold(ch: char) -> char {
    let mut lower = ch.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(single), None) => single,
        _ => ch,
    }
}

/// Canonical form of free text: mapped characters, single spaces, trimmed.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for ch in input.chars() {
        match map_char(ch) {
            Mapped::Skip => {}
            Mapped::Space => pending_space = true,
            Mapped::One(c) => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
            Mapped::Ellipsis => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push_str("...");
            }
        }
    }
    out
}

static NUMBERED_HEADER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:глава|часть|книга|том|chapter|part|book|volume)\s+([\p{L}\p{N}-]+)\.?\s*(?:[:\-]\s*)?",
    )
    .ok()
});

static NAMED_HEADER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:пролог|эпилог|интерлюдия|предисловие|послесловие|prologue|epilogue|interlude|preface|afterword)\b\.?\s*(?:[:\-]\s*)?",
    )
    .ok()
});

/// Drop a leading chapter header such as `Глава 4 ` or `Chapter IV: `.
///
/// Only strips when the token after the keyword really is a number, so
/// `Part of the crowd...` is left alone.
pub fn strip_chapter_header(text: &str) -> &str {
    if let Some(re) = NUMBERED_HEADER.as_ref() {
        if let Some(caps) = re.captures(text) {
            let is_number = caps
                .get(1)
                .map(|token| parse_number_token(token.as_str()).is_some())
                .unwrap_or(false);
            if is_number {
                if let Some(whole) = caps.get(0) {
                    return &text[whole.end()..];
                }
            }
        }
    }
    if let Some(re) = NAMED_HEADER.as_ref() {
        if let Some(found) = re.find(text) {
            return &text[found.end()..];
        }
    }
    text
}

/// Normalized description text used for matching.
pub fn normalize_description(content: &str) -> String {
    let normalized = normalize_text(content);
    strip_chapter_header(&normalized).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_maps_typography() {
        let input = "  «Тише,\u{00A0}— сказала\n\tона…»  ";
        assert_eq!(normalize_text(input), "\"Тише, - сказала она...\"");
    }

    #[test]
    fn drops_invisible_characters() {
        assert_eq!(normalize_text("co\u{00AD}op\u{200B}er\u{FEFF}ate"), "cooperate");
    }

    #[test]
    fn maps_yo_and_smart_quotes() {
        assert_eq!(normalize_text("Он шёл \u{201C}домой\u{201D}"), "Он шел \"домой\"");
        assert_eq!(normalize_text("it\u{2019}s"), "it's");
    }

    #[test]
    fn fold_is_single_char() {
        assert_eq!(fold('Ж'), 'ж');
        assert_eq!(fold('A'), 'a');
        // 'İ' lowercases to two chars and is left as is.
        assert_eq!(fold('\u{0130}'), '\u{0130}');
    }

    #[test]
    fn strips_numbered_headers() {
        assert_eq!(strip_chapter_header("Глава 4 Нити судьбы"), "Нити судьбы");
        assert_eq!(strip_chapter_header("Chapter IV: The storm came"), "The storm came");
        assert_eq!(strip_chapter_header("глава четвертая. Утро"), "Утро");
        assert_eq!(strip_chapter_header("Part two - Ashes"), "Ashes");
    }

    #[test]
    fn keeps_text_without_real_header() {
        assert_eq!(strip_chapter_header("Part of the crowd moved"), "Part of the crowd moved");
        assert_eq!(strip_chapter_header("The book lay open"), "The book lay open");
    }

    #[test]
    fn strips_named_headers() {
        assert_eq!(strip_chapter_header("Пролог. Тьма сгущалась"), "Тьма сгущалась");
        assert_eq!(strip_chapter_header("Prologue The night"), "The night");
        assert_eq!(strip_chapter_header("Prologues are dull"), "Prologues are dull");
    }

    #[test]
    fn description_normalization_combines_both() {
        assert_eq!(
            normalize_description("  Глава 4   Нити\u{2014}тонкие "),
            "Нити-тонкие"
        );
    }
}
