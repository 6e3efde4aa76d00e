//! Per-description search patterns and their bounded memo.

use std::collections::VecDeque;
use std::rc::Rc;

use smallvec::SmallVec;

use super::normalize::{fold, normalize_description};
use super::{AnchorConfig, MatchStrategy};
use crate::description::Description;

/// One literal probe derived from a description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SearchPattern {
    pub(crate) strategy: MatchStrategy,
    /// Folded when `case_insensitive`, otherwise normalized text.
    pub(crate) text: String,
    /// Char offset of the pattern inside the normalized description.
    pub(crate) offset: usize,
    pub(crate) chars: usize,
    pub(crate) case_insensitive: bool,
}

/// Normalized description plus its probes, cheapest first.
#[derive(Clone, Debug)]
pub(crate) struct PreparedDescription {
    pub(crate) fingerprint: u32,
    pub(crate) folded: Vec<char>,
    pub(crate) patterns: SmallVec<[SearchPattern; 8]>,
}

impl PreparedDescription {
    pub(crate) fn len(&self) -> usize {
        self.folded.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }
}

pub(crate) fn prepare(content: &str, config: &AnchorConfig) -> PreparedDescription {
    let normalized = normalize_description(content);
    let chars: Vec<char> = normalized.chars().collect();
    let folded: Vec<char> = chars.iter().map(|c| fold(*c)).collect();
    let len = chars.len();
    let mut patterns: SmallVec<[SearchPattern; 8]> = SmallVec::new();

    let mut add = |strategy: MatchStrategy, start: usize, end: usize, case_insensitive: bool| {
        let end = end.min(len);
        if start >= end || end - start < config.min_pattern_chars {
            return;
        }
        let source = if case_insensitive { &folded } else { &chars };
        let text: String = source[start..end].iter().collect();
        let text = text.trim().to_string();
        let trimmed_chars = text.chars().count();
        if trimmed_chars < config.min_pattern_chars {
            return;
        }
        if patterns
            .iter()
            .any(|p| p.text == text && p.case_insensitive == case_insensitive)
        {
            return;
        }
        let leading = source[start..end].iter().take_while(|c| **c == ' ').count();
        patterns.push(SearchPattern {
            strategy,
            text,
            offset: start + leading,
            chars: trimmed_chars,
            case_insensitive,
        });
    };

    add(MatchStrategy::Prefix, 0, config.prefix_chars, false);

    for skip in &config.skip_offsets {
        if *skip < len {
            add(MatchStrategy::SkippedPrefix, *skip, skip + config.prefix_chars, false);
        }
    }

    let word_end = nth_word_end(&chars, config.first_words);
    if let Some(end) = word_end {
        add(MatchStrategy::FirstWords, 0, end, false);
    }

    if len <= config.full_text_max_chars {
        add(MatchStrategy::Full, 0, len, false);
    }

    let middle_start = len * usize::from(config.middle_start_percent) / 100;
    let middle_end = (len * usize::from(config.middle_end_percent) / 100)
        .min(middle_start + config.middle_max_chars);
    add(MatchStrategy::Middle, middle_start, middle_end, false);

    let sentence_end = first_sentence_end(&chars).unwrap_or(len);
    add(
        MatchStrategy::FirstSentence,
        0,
        sentence_end.min(config.sentence_max_chars),
        true,
    );

    PreparedDescription {
        fingerprint: crc32fast::hash(content.as_bytes()),
        folded,
        patterns,
    }
}

/// Char index just past the `count`-th word, when the text has that many.
fn nth_word_end(chars: &[char], count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let mut seen = 0usize;
    let mut in_word = false;
    for (idx, ch) in chars.iter().enumerate() {
        if *ch == ' ' {
            if in_word {
                seen += 1;
                if seen == count {
                    return Some(idx);
                }
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    if in_word && seen + 1 == count {
        return Some(chars.len());
    }
    None
}

/// Char index just past the first sentence terminator run.
fn first_sentence_end(chars: &[char]) -> Option<usize> {
    let idx = chars.iter().position(|c| matches!(c, '.' | '!' | '?'))?;
    let mut end = idx + 1;
    while end < chars.len() && matches!(chars[end], '.' | '!' | '?' | '"' | '\'') {
        end += 1;
    }
    Some(end)
}

/// Bounded memo of prepared descriptions, least recently used evicted first.
pub(crate) struct PreparedCache {
    capacity: usize,
    entries: VecDeque<(String, Rc<PreparedDescription>)>,
    hits: u64,
    misses: u64,
}

impl PreparedCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub(crate) fn get_or_prepare(
        &mut self,
        description: &Description,
        config: &AnchorConfig,
    ) -> Rc<PreparedDescription> {
        let fingerprint = crc32fast::hash(description.content.as_bytes());
        if let Some(pos) = self.entries.iter().position(|(id, _)| *id == description.id) {
            if let Some((id, prepared)) = self.entries.remove(pos) {
                if prepared.fingerprint == fingerprint {
                    self.hits += 1;
                    self.entries.push_back((id, Rc::clone(&prepared)));
                    return prepared;
                }
            }
        }
        self.misses += 1;
        let prepared = Rc::new(prepare(&description.content, config));
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries
            .push_back((description.id.clone(), Rc::clone(&prepared)));
        prepared
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
