//! Anchoring free-text descriptions onto rendered page text.
//!
//! Descriptions come from an extraction pipeline with no offsets, so each one
//! is located by a ladder of literal probes over the normalized page text,
//! cheapest first. Matches are returned as node/byte positions; applying them
//! to a DOM is left to the host through [`plan_highlights`].

mod fuzzy;
mod highlight;
mod normalize;
mod page;
mod prepare;
mod xhtml;

use std::ops::Range;
use std::rc::Rc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use fuzzy::{FrameBudget, IdleDeadline, NoIdleTime};
pub use highlight::{plan_highlights, HighlightSlice};
pub use normalize::{normalize_description, normalize_text, strip_chapter_header};
pub use page::{TextNode, TextPosition};
pub use xhtml::extract_text_nodes;

use fuzzy::longest_common_substring;
use page::PageText;
use prepare::{PreparedCache, PreparedDescription};

use crate::description::{Description, DescriptionKind};

/// Which probe located a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Leading window of the description.
    Prefix,
    /// Leading window after skipping a few chars.
    SkippedPrefix,
    FirstWords,
    /// Whole description, for short ones.
    Full,
    Middle,
    /// First sentence, case-insensitive.
    FirstSentence,
    /// Longest common substring, only with idle time.
    Fuzzy,
}

/// Matching knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub prefix_chars: usize,
    pub skip_offsets: Vec<usize>,
    pub first_words: usize,
    pub full_text_max_chars: usize,
    pub middle_start_percent: u8,
    pub middle_end_percent: u8,
    /// Upper bound on the middle window length.
    pub middle_max_chars: usize,
    pub sentence_max_chars: usize,
    pub min_pattern_chars: usize,
    /// Occurrences of one probe scored before picking the best.
    pub max_candidates: usize,
    pub max_extension_factor: f32,
    pub fuzzy_window_chars: usize,
    pub fuzzy_min_chars: usize,
    pub cache_capacity: usize,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            prefix_chars: 40,
            skip_offsets: vec![10, 20],
            first_words: 5,
            full_text_max_chars: 200,
            middle_start_percent: 15,
            middle_end_percent: 60,
            middle_max_chars: 80,
            sentence_max_chars: 200,
            min_pattern_chars: 12,
            max_candidates: 16,
            max_extension_factor: 1.3,
            fuzzy_window_chars: 160,
            fuzzy_min_chars: 24,
            cache_capacity: 256,
        }
    }
}

impl AnchorConfig {
    /// Smaller memo and candidate fan-out for constrained hosts.
    pub fn low_memory() -> Self {
        Self {
            max_candidates: 4,
            cache_capacity: 32,
            ..Self::default()
        }
    }
}

/// A description located on the current page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorMatch {
    pub description_id: String,
    pub kind: DescriptionKind,
    pub start: TextPosition,
    /// Exclusive end.
    pub end: TextPosition,
    /// Length of the span in normalized chars.
    pub matched_chars: usize,
    pub strategy: MatchStrategy,
}

#[derive(Clone, Debug)]
struct Hit {
    span: Range<usize>,
    strategy: MatchStrategy,
}

/// Stateful matcher: owns the per-description memo across pages.
pub struct ContentAnchor {
    config: AnchorConfig,
    cache: PreparedCache,
}

impl Default for ContentAnchor {
    fn default() -> Self {
        Self::new(AnchorConfig::default())
    }
}

impl ContentAnchor {
    pub fn new(config: AnchorConfig) -> Self {
        let cache = PreparedCache::new(config.cache_capacity);
        Self { config, cache }
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Replace the configuration; memoized probes are dropped.
    pub fn set_config(&mut self, config: AnchorConfig) {
        self.cache = PreparedCache::new(config.cache_capacity);
        self.config = config;
    }

    /// Number of memoized descriptions.
    pub fn cached_descriptions(&self) -> usize {
        self.cache.len()
    }

    /// Memo `(hits, misses)` since construction.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Drop every memoized probe, e.g. once a chapter's descriptions are gone.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Locate descriptions with the literal probes only.
    pub fn anchor(&mut self, descriptions: &[Description], nodes: &[TextNode]) -> Vec<AnchorMatch> {
        self.run(descriptions, nodes, None)
    }

    /// Like [`ContentAnchor::anchor`], then spend remaining idle time on the
    /// fuzzy fallback for descriptions still unmatched.
    pub fn anchor_with_idle(
        &mut self,
        descriptions: &[Description],
        nodes: &[TextNode],
        deadline: &dyn IdleDeadline,
    ) -> Vec<AnchorMatch> {
        self.run(descriptions, nodes, Some(deadline))
    }

    fn run(
        &mut self,
        descriptions: &[Description],
        nodes: &[TextNode],
        deadline: Option<&dyn IdleDeadline>,
    ) -> Vec<AnchorMatch> {
        let started = Instant::now();
        let page = PageText::build(nodes);
        if page.is_empty() || descriptions.is_empty() {
            return Vec::new();
        }

        let mut claims: Vec<Range<usize>> = Vec::new();
        let mut matches = Vec::new();
        let mut unmatched: Vec<(&Description, Rc<PreparedDescription>)> = Vec::new();

        for description in descriptions {
            let prepared = self.cache.get_or_prepare(description, &self.config);
            if prepared.is_empty() {
                continue;
            }
            match find_literal(&page, &prepared, &claims, &self.config) {
                Some(hit) => {
                    claims.push(hit.span.clone());
                    matches.push(to_match(&page, description, hit));
                }
                None => unmatched.push((description, prepared)),
            }
        }

        let literal_matches = matches.len();
        if let Some(deadline) = deadline {
            for (idx, (description, prepared)) in unmatched.iter().enumerate() {
                if deadline.is_expired() {
                    log::debug!(
                        "idle time exhausted with {} descriptions left for fuzzy matching",
                        unmatched.len() - idx
                    );
                    break;
                }
                if let Some(hit) = find_fuzzy(&page, prepared, &claims, &self.config) {
                    claims.push(hit.span.clone());
                    matches.push(to_match(&page, description, hit));
                }
            }
        }

        let (hits, misses) = self.cache.stats();
        log::debug!(
            "anchored {}/{} descriptions ({} fuzzy) over {} chars in {:?}, memo {}/{} hits",
            matches.len(),
            descriptions.len(),
            matches.len() - literal_matches,
            page.len(),
            started.elapsed(),
            hits,
            hits + misses
        );
        matches
    }
}

fn to_match(page: &PageText, description: &Description, hit: Hit) -> AnchorMatch {
    AnchorMatch {
        description_id: description.id.clone(),
        kind: description.kind,
        start: page.start_position(hit.span.start),
        end: page.end_position(hit.span.end),
        matched_chars: hit.span.len(),
        strategy: hit.strategy,
    }
}

fn overlaps(claims: &[Range<usize>], span: &Range<usize>) -> bool {
    claims
        .iter()
        .any(|claim| claim.start < span.end && span.start < claim.end)
}

/// How many chars past `page_start` / `desc_start` keep agreeing.
fn agreement(page: &[char], page_start: usize, description: &[char], desc_start: usize) -> usize {
    page.get(page_start..)
        .unwrap_or_default()
        .iter()
        .zip(description.get(desc_start..).unwrap_or_default())
        .take_while(|(a, b)| a == b)
        .count()
}

fn find_literal(
    page: &PageText,
    prepared: &PreparedDescription,
    claims: &[Range<usize>],
    config: &AnchorConfig,
) -> Option<Hit> {
    for pattern in &prepared.patterns {
        let candidates = page.find_all(
            &pattern.text,
            pattern.case_insensitive,
            config.max_candidates,
            |start| !overlaps(claims, &(start..start + pattern.chars)),
        );
        let mut best: Option<(usize, usize)> = None;
        for start in candidates {
            let score = agreement(page.folded_chars(), start, &prepared.folded, pattern.offset);
            // Strictly greater keeps the earliest occurrence on ties.
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, start));
            }
        }
        if let Some((_, start)) = best {
            let span = resolve_span(
                page,
                claims,
                start,
                pattern.offset,
                pattern.chars,
                prepared.len(),
                config,
            );
            return Some(Hit {
                span,
                strategy: pattern.strategy,
            });
        }
    }
    None
}

fn find_fuzzy(
    page: &PageText,
    prepared: &PreparedDescription,
    claims: &[Range<usize>],
    config: &AnchorConfig,
) -> Option<Hit> {
    let window = prepared.len().min(config.fuzzy_window_chars);
    let needle = &prepared.folded[..window];
    let mut blocked = vec![false; page.len()];
    for claim in claims {
        for flag in blocked.iter_mut().take(claim.end).skip(claim.start) {
            *flag = true;
        }
    }
    let (len, desc_start, page_start) =
        longest_common_substring(needle, page.folded_chars(), &blocked)?;
    if len < config.fuzzy_min_chars {
        return None;
    }
    let span = resolve_span(page, claims, page_start, desc_start, len, prepared.len(), config);
    Some(Hit {
        span,
        strategy: MatchStrategy::Fuzzy,
    })
}

/// Grow a probe hit into the span the description covers on the page.
///
/// The span runs for the rest of the description from the probe offset, then
/// extends to the next sentence end (plus closing quotes) within
/// `max_extension_factor`, else to the next word boundary within the same
/// bound. It never runs into a claimed span and never ends on a space.
fn resolve_span(
    page: &PageText,
    claims: &[Range<usize>],
    start: usize,
    desc_offset: usize,
    probe_chars: usize,
    desc_len: usize,
    config: &AnchorConfig,
) -> Range<usize> {
    let remaining = desc_len.saturating_sub(desc_offset).max(probe_chars);
    let barrier = claims
        .iter()
        .filter(|claim| claim.start >= start + probe_chars)
        .map(|claim| claim.start)
        .min()
        .unwrap_or(usize::MAX)
        .min(page.len());
    let base_end = (start + remaining).min(barrier);
    let extra = ((remaining as f32) * (config.max_extension_factor - 1.0).max(0.0)).ceil() as usize;
    let limit = (base_end + extra).min(barrier);

    let mut start = start;
    let mut end = extend_to_boundary(page, base_end, limit);
    while start + 1 < end && page.char_at(start) == Some(' ') {
        start += 1;
    }
    while end > start + 1 && page.char_at(end - 1) == Some(' ') {
        end -= 1;
    }
    start..end
}

fn is_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

fn is_closing(ch: char) -> bool {
    matches!(ch, '"' | '\'' | ')' | ']')
}

fn extend_to_boundary(page: &PageText, base_end: usize, limit: usize) -> usize {
    if base_end >= page.len() {
        return page.len();
    }
    // Already at a sentence end.
    if base_end > 0 && page.char_at(base_end - 1).is_some_and(is_terminal) {
        let mut end = base_end;
        while end < limit && page.char_at(end).is_some_and(|c| is_terminal(c) || is_closing(c)) {
            end += 1;
        }
        return end;
    }
    for idx in base_end..limit {
        if page.char_at(idx).is_some_and(is_terminal) {
            let mut end = idx + 1;
            while end < limit
                && page
                    .char_at(end)
                    .is_some_and(|c| is_terminal(c) || is_closing(c))
            {
                end += 1;
            }
            return end;
        }
    }
    if page.char_at(base_end) == Some(' ') {
        return base_end;
    }
    for idx in base_end..limit {
        if page.char_at(idx) == Some(' ') {
            return idx;
        }
    }
    base_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(paragraphs: &[&str]) -> Vec<TextNode> {
        paragraphs
            .iter()
            .enumerate()
            .map(|(idx, text)| TextNode::new(*text, idx as u32))
            .collect()
    }

    fn text_of(nodes: &[TextNode], found: &AnchorMatch) -> String {
        assert_eq!(found.start.node, found.end.node, "test helper expects one node");
        nodes[found.start.node].text[found.start.offset..found.end.offset].to_string()
    }

    #[test]
    fn verbatim_description_matches_by_prefix() {
        let page = nodes(&[
            "Ветер гнал по небу рваные облака.",
            "Старая мельница стояла на холме, и её крылья давно не вращались.",
        ]);
        let descriptions = vec![Description::new(
            "d1",
            DescriptionKind::Location,
            "Старая мельница стояла на холме, и её крылья давно не вращались.",
        )];
        let mut anchor = ContentAnchor::default();
        let found = anchor.anchor(&descriptions, &page);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].strategy, MatchStrategy::Prefix);
        assert_eq!(text_of(&page, &found[0]), page[1].text);
    }

    #[test]
    fn claimed_occurrences_do_not_use_up_candidate_slots() {
        let line = "Колокол пробил над гаванью ровно в полдень.";
        let page = nodes(&[line, line]);
        let descriptions = vec![
            Description::new("a", DescriptionKind::Action, line),
            Description::new("b", DescriptionKind::Action, line),
        ];
        let config = AnchorConfig {
            max_candidates: 1,
            ..AnchorConfig::default()
        };
        let found = ContentAnchor::new(config).anchor(&descriptions, &page);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].start.node, 0);
        assert_eq!(found[1].start.node, 1);
        assert_ne!(found[1].strategy, MatchStrategy::Fuzzy);
    }

    #[test]
    fn memo_is_reused_across_pages_until_cleared() {
        let text = "Старая мельница стояла на холме, и её крылья давно не вращались.";
        let page = nodes(&[text]);
        let descriptions = vec![Description::new("d1", DescriptionKind::Location, text)];
        let mut anchor = ContentAnchor::default();
        anchor.anchor(&descriptions, &page);
        anchor.anchor(&descriptions, &page);
        assert_eq!(anchor.cache_stats(), (1, 1));
        assert_eq!(anchor.cached_descriptions(), 1);

        anchor.clear_cache();
        assert_eq!(anchor.cached_descriptions(), 0);
        anchor.anchor(&descriptions, &page);
        assert_eq!(anchor.cache_stats(), (1, 2));
    }

    #[test]
    fn header_prefix_is_stripped_before_matching() {
        let page = nodes(&[
            "Нити тянулись от окна к двери, серебрясь в лунном свете. Дальше было темно.",
        ]);
        let descriptions = vec![Description::new(
            "d1",
            DescriptionKind::Atmosphere,
            "Глава 4 Нити тянулись от окна к двери, серебрясь в лунном свете.",
        )];
        let found = ContentAnchor::default().anchor(&descriptions, &page);
        assert_eq!(found.len(), 1);
        assert_eq!(
            text_of(&page, &found[0]),
            "Нити тянулись от окна к двери, серебрясь в лунном свете."
        );
    }

    #[test]
    fn typography_differences_still_match() {
        let page = nodes(&[
            "\u{00AB}Стой!\u{00BB} \u{2014} крикнул он, и эхо покатилось по ущелью.",
        ]);
        let descriptions = vec![Description::new(
            "d1",
            DescriptionKind::Action,
            "\"Стой!\" - крикнул он, и эхо покатилось по ущелью.",
        )];
        let found = ContentAnchor::default().anchor(&descriptions, &page);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start.offset, 0);
        assert_eq!(found[0].end.offset, page[0].text.len());
    }

    #[test]
    fn span_extends_to_sentence_end_within_bound() {
        let page = nodes(&[
            "The tower leaned over the square like a tired giant. People avoided it.",
        ]);
        let descriptions = vec![Description::new(
            "d1",
            DescriptionKind::Location,
            "The tower leaned over the square like a tired",
        )];
        let found = ContentAnchor::default().anchor(&descriptions, &page);
        assert_eq!(
            text_of(&page, &found[0]),
            "The tower leaned over the square like a tired giant."
        );
    }

    #[test]
    fn near_duplicates_take_distinct_spans() {
        let first = "The corridor smelled of wax and old paper, and the lamps hissed softly.";
        let second = "The corridor smelled of wax and old paper, but the windows were open.";
        let page = nodes(&[first, "Between them a door.", second]);
        let descriptions = vec![
            Description::new("b", DescriptionKind::Location, second),
            Description::new("a", DescriptionKind::Location, first),
        ];
        let found = ContentAnchor::default().anchor(&descriptions, &page);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].description_id, "b");
        assert_eq!(found[0].start.node, 2);
        assert_eq!(found[1].description_id, "a");
        assert_eq!(found[1].start.node, 0);
    }

    #[test]
    fn identical_descriptions_with_one_occurrence_match_once() {
        let text = "A single lantern swung above the gate of the inn.";
        let page = nodes(&[text]);
        let descriptions = vec![
            Description::new("x", DescriptionKind::Object, text),
            Description::new("y", DescriptionKind::Object, text),
        ];
        let mut anchor = ContentAnchor::default();
        for _ in 0..3 {
            let found = anchor.anchor(&descriptions, &page);
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].description_id, "x");
        }
    }

    #[test]
    fn fuzzy_fallback_needs_idle_time() {
        let page = nodes(&[
            "Somewhere below the old river kept grinding slabs of grey ice against the piers all night.",
        ]);
        let descriptions = vec![Description::new(
            "d1",
            DescriptionKind::Atmosphere,
            "Far off, the old river kept grinding slabs of ice against the piers, loud and slow.",
        )];
        let mut anchor = ContentAnchor::default();
        let none = anchor.anchor_with_idle(&descriptions, &page, &NoIdleTime);
        assert!(none.is_empty());
        let budget = FrameBudget::new(std::time::Duration::from_secs(5));
        let found = anchor.anchor_with_idle(&descriptions, &page, &budget);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].strategy, MatchStrategy::Fuzzy);
        assert_eq!(
            text_of(&page, &found[0]),
            "the old river kept grinding slabs of grey ice against the piers all night."
        );
    }

    #[test]
    fn empty_inputs_produce_nothing() {
        let mut anchor = ContentAnchor::default();
        assert!(anchor.anchor(&[], &nodes(&["text"])).is_empty());
        let d = vec![Description::new("d", DescriptionKind::Other, "Some long enough text here")];
        assert!(anchor.anchor(&d, &[]).is_empty());
        assert!(anchor.anchor(&d, &nodes(&["   "])).is_empty());
    }

    #[test]
    fn match_spanning_inline_nodes() {
        let page = vec![
            TextNode::new("Он увидел ", 0),
            TextNode::new("красный", 0),
            TextNode::new(" фонарь над дверью трактира.", 0),
        ];
        let descriptions = vec![Description::new(
            "d1",
            DescriptionKind::Object,
            "Он увидел красный фонарь над дверью трактира.",
        )];
        let found = ContentAnchor::default().anchor(&descriptions, &page);
        assert_eq!(found[0].start, TextPosition { node: 0, offset: 0 });
        assert_eq!(found[0].end, TextPosition { node: 2, offset: page[2].text.len() });
        let slices = plan_highlights(&found, &page, None);
        assert_eq!(slices.len(), 3);
    }
}
