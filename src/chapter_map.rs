//! Map spine/TOC hrefs to the backend's logical chapter numbers.
//!
//! The backend numbers chapters by its own reading of the book, which rarely
//! matches raw spine order (cover, title page and notes are spine items too).
//! TOC labels are matched against backend titles first; whatever is left is
//! paired up by position.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ordinal::ordinal_in_title;
use crate::toc::Toc;

/// Backend-side chapter record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMetadata {
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub word_count: u32,
}

impl ChapterMetadata {
    pub fn new(number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            word_count: 0,
        }
    }
}

/// How an href got its chapter number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MappingSource {
    ExactTitle,
    Containment,
    Ordinal,
    /// Paired by position among unmatched entries.
    Positional,
    /// Inherited from the preceding spine item.
    Spine,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedEntry {
    /// Normalized href.
    pub href: String,
    pub chapter: u32,
    pub source: MappingSource,
}

/// Normalized href to chapter number. Built once per session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChapterMapping {
    entries: Vec<MappedEntry>,
    by_href: BTreeMap<String, u32>,
}

impl ChapterMapping {
    /// Pair every TOC entry (nested ones included, in reading order) with a
    /// backend chapter.
    pub fn build(toc: &Toc, chapters: &[ChapterMetadata]) -> Self {
        let mut mapping = Self::default();
        let titles: Vec<String> = chapters.iter().map(|c| normalize_title(&c.title)).collect();
        let ordinals: Vec<Option<u32>> = chapters
            .iter()
            .map(|c| ordinal_in_title(&c.title))
            .collect();
        let mut claimed = vec![false; chapters.len()];
        let mut unmatched: Vec<String> = Vec::new();

        for entry in toc.flatten() {
            let href = normalize_href(entry.href);
            if href.is_empty() || mapping.by_href.contains_key(&href) {
                continue;
            }
            let label = normalize_title(entry.label);
            let label_ordinal = ordinal_in_title(entry.label);
            match match_title(&label, label_ordinal, &titles, &ordinals, &claimed) {
                Some((idx, source)) => {
                    claimed[idx] = true;
                    mapping.insert(href, chapters[idx].number, source);
                }
                None => {
                    if !unmatched.contains(&href) {
                        unmatched.push(href);
                    }
                }
            }
        }

        let mut remaining: Vec<usize> = (0..chapters.len()).filter(|idx| !claimed[*idx]).collect();
        remaining.sort_by_key(|idx| chapters[*idx].number);
        let mut remaining = remaining.into_iter();
        for href in unmatched {
            if mapping.by_href.contains_key(&href) {
                continue;
            }
            let Some(idx) = remaining.next() else {
                break;
            };
            log::debug!(
                "positional chapter assignment: {} -> {} ({:?})",
                href,
                chapters[idx].number,
                chapters[idx].title
            );
            mapping.insert(href, chapters[idx].number, MappingSource::Positional);
        }
        mapping
    }

    /// Give spine items missing from the TOC the chapter of the nearest
    /// preceding mapped item.
    pub fn with_spine<S: AsRef<str>>(mut self, spine_hrefs: &[S]) -> Self {
        let mut current: Option<u32> = None;
        for raw in spine_hrefs {
            let href = normalize_href(raw.as_ref());
            if href.is_empty() {
                continue;
            }
            match self.chapter_number_for(&href) {
                Some(chapter) => current = Some(chapter),
                None => {
                    if let Some(chapter) = current {
                        self.insert(href, chapter, MappingSource::Spine);
                    }
                }
            }
        }
        self
    }

    /// Chapter for an href as reported by the renderer. Falls back to a
    /// unique basename match when the paths are rooted differently.
    pub fn chapter_number_for(&self, href: &str) -> Option<u32> {
        let href = normalize_href(href);
        if let Some(chapter) = self.by_href.get(&href) {
            return Some(*chapter);
        }
        let basename = basename_of(&href);
        if basename.is_empty() {
            return None;
        }
        let mut found: Option<u32> = None;
        for entry in &self.entries {
            if basename_of(&entry.href) == basename {
                match found {
                    Some(existing) if existing != entry.chapter => return None,
                    _ => found = Some(entry.chapter),
                }
            }
        }
        found
    }

    pub fn entries(&self) -> &[MappedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, href: String, chapter: u32, source: MappingSource) {
        if self.by_href.contains_key(&href) {
            return;
        }
        self.by_href.insert(href.clone(), chapter);
        self.entries.push(MappedEntry { href, chapter, source });
    }
}

fn match_title(
    label: &str,
    label_ordinal: Option<u32>,
    titles: &[String],
    ordinals: &[Option<u32>],
    claimed: &[bool],
) -> Option<(usize, MappingSource)> {
    if label.is_empty() {
        return None;
    }
    let open = || (0..titles.len()).filter(|idx| !claimed[*idx]);

    if let Some(idx) = open().find(|idx| titles[*idx] == label) {
        return Some((idx, MappingSource::ExactTitle));
    }

    let contained = open().find(|idx| {
        let title = &titles[*idx];
        let (short, long) = if title.chars().count() <= label.chars().count() {
            (title.as_str(), label)
        } else {
            (label, title.as_str())
        };
        // "глава 1" is inside "глава 10"; differing ordinals veto containment.
        let conflicting = matches!((label_ordinal, ordinals[*idx]), (Some(a), Some(b)) if a != b);
        short.chars().count() >= 3 && long.contains(short) && !conflicting
    });
    if let Some(idx) = contained {
        return Some((idx, MappingSource::Containment));
    }

    let wanted = label_ordinal?;
    open()
        .find(|idx| ordinals[*idx] == Some(wanted))
        .map(|idx| (idx, MappingSource::Ordinal))
}

/// Lowercased, whitespace-collapsed title without edge punctuation.
fn normalize_title(title: &str) -> String {
    let collapsed = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace('ё', "е");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// Fragment and query stripped, percent-decoded, dot segments resolved,
/// backslashes turned into slashes, lowercased.
pub fn normalize_href(href: &str) -> String {
    let (path, _) = split_href_fragment(href);
    let path = path.split_once('?').map_or(path, |(without_query, _)| without_query);
    let decoded = percent_decode(path).replace('\\', "/");
    let mut parts: Vec<&str> = Vec::with_capacity(8);
    for part in decoded.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            let _ = parts.pop();
            continue;
        }
        parts.push(part);
    }
    parts.join("/").to_lowercase()
}

fn split_href_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment).filter(|f| !f.is_empty())),
        None => (href, None),
    }
}

fn basename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn percent_decode(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let high = bytes.get(idx + 1).and_then(|b| (*b as char).to_digit(16));
            let low = bytes.get(idx + 2).and_then(|b| (*b as char).to_digit(16));
            if let (Some(high), Some(low)) = (high, low) {
                out.push((high * 16 + low) as u8);
                idx += 3;
                continue;
            }
        }
        out.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| input.to_string())
}
