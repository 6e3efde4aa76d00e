//! Normalized view over the text nodes of one rendered page.

use smallvec::SmallVec;

use super::normalize::{fold, map_char, Mapped};

/// One DOM text node of a rendered page, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextNode {
    pub text: String,
    /// Id of the enclosing block element. Adjacent nodes with different block
    /// ids are joined with a space.
    pub block: u32,
    /// CFI steps from the document element down to this text node.
    pub steps: SmallVec<[u32; 8]>,
}

impl TextNode {
    pub fn new(text: impl Into<String>, block: u32) -> Self {
        Self {
            text: text.into(),
            block,
            steps: SmallVec::new(),
        }
    }

    pub fn with_steps(mut self, steps: &[u32]) -> Self {
        self.steps = SmallVec::from_slice(steps);
        self
    }
}

/// Position inside the original node list: node index plus UTF-8 byte offset
/// into that node's text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextPosition {
    pub node: usize,
    pub offset: usize,
}

#[derive(Clone, Copy, Debug)]
struct Origin {
    node: u32,
    start: u32,
    end: u32,
}

/// Page text in canonical form with a per-char map back to source nodes.
pub(crate) struct PageText {
    text: String,
    folded: String,
    chars: Vec<char>,
    folded_chars: Vec<char>,
    text_starts: Vec<usize>,
    folded_starts: Vec<usize>,
    origins: Vec<Origin>,
}

impl PageText {
    pub(crate) fn build(nodes: &[TextNode]) -> Self {
        let capacity: usize = nodes.iter().map(|n| n.text.len()).sum();
        let mut page = Self {
            text: String::with_capacity(capacity),
            folded: String::with_capacity(capacity),
            chars: Vec::with_capacity(capacity),
            folded_chars: Vec::with_capacity(capacity),
            text_starts: Vec::with_capacity(capacity),
            folded_starts: Vec::with_capacity(capacity),
            origins: Vec::with_capacity(capacity),
        };

        let mut pending_space = false;
        let mut last_block: Option<u32> = None;
        for (node_idx, node) in nodes.iter().enumerate() {
            if last_block.is_some_and(|block| block != node.block) {
                pending_space = true;
            }
            last_block = Some(node.block);
            let node_idx = node_idx as u32;
            for (byte, ch) in node.text.char_indices() {
                let start = byte as u32;
                let end = (byte + ch.len_utf8()) as u32;
                let (produced, repeat) = match map_char(ch) {
                    Mapped::Skip => continue,
                    Mapped::Space => {
                        pending_space = true;
                        continue;
                    }
                    Mapped::One(c) => (c, 1),
                    Mapped::Ellipsis => ('.', 3),
                };
                if pending_space && !page.chars.is_empty() {
                    // Zero-width origin: the space maps to the start of the
                    // next visible char.
                    page.push(' ', Origin { node: node_idx, start, end: start });
                }
                pending_space = false;
                for _ in 0..repeat {
                    page.push(produced, Origin { node: node_idx, start, end });
                }
            }
        }
        page
    }

    fn push(&mut self, ch: char, origin: Origin) {
        self.text_starts.push(self.text.len());
        self.text.push(ch);
        let folded = fold(ch);
        self.folded_starts.push(self.folded.len());
        self.folded.push(folded);
        self.chars.push(ch);
        self.folded_chars.push(folded);
        self.origins.push(origin);
    }

    pub(crate) fn len(&self) -> usize {
        self.chars.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub(crate) fn char_at(&self, idx: usize) -> Option<char> {
        self.chars.get(idx).copied()
    }

    pub(crate) fn folded_chars(&self) -> &[char] {
        &self.folded_chars
    }

    /// Char indices of non-overlapping occurrences of `pattern` that `keep`
    /// accepts, up to `limit`. Rejected occurrences do not count towards it.
    pub(crate) fn find_all(
        &self,
        pattern: &str,
        case_insensitive: bool,
        limit: usize,
        mut keep: impl FnMut(usize) -> bool,
    ) -> SmallVec<[usize; 8]> {
        let (haystack, starts) = if case_insensitive {
            (&self.folded, &self.folded_starts)
        } else {
            (&self.text, &self.text_starts)
        };
        let mut hits = SmallVec::new();
        if pattern.is_empty() {
            return hits;
        }
        for (byte, _) in haystack.match_indices(pattern) {
            if hits.len() >= limit {
                break;
            }
            if let Ok(char_idx) = starts.binary_search(&byte) {
                if keep(char_idx) {
                    hits.push(char_idx);
                }
            }
        }
        hits
    }

    /// Source position of the char at `idx`.
    pub(crate) fn start_position(&self, idx: usize) -> TextPosition {
        match self.origins.get(idx) {
            Some(origin) => TextPosition {
                node: origin.node as usize,
                offset: origin.start as usize,
            },
            None => self.end_position(self.len()),
        }
    }

    /// Source position just past the char at `end - 1`.
    pub(crate) fn end_position(&self, end: usize) -> TextPosition {
        match end.checked_sub(1).and_then(|last| self.origins.get(last)) {
            Some(origin) => TextPosition {
                node: origin.node as usize,
                offset: origin.end as usize,
            },
            None => TextPosition::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<TextNode> {
        vec![
            TextNode::new("  Он \u{2014} шёл", 0),
            TextNode::new("домой…", 0),
            TextNode::new("Утро", 1),
        ]
    }

    #[test]
    fn joins_blocks_with_space_and_normalizes() {
        let page = PageText::build(&nodes());
        assert_eq!(page.text, "Он - шелдомой... Утро");
        assert_eq!(page.len(), page.text.chars().count());
        assert_eq!(page.folded, "он - шелдомой... утро");
    }

    #[test]
    fn maps_chars_back_to_node_bytes() {
        let nodes = nodes();
        let page = PageText::build(&nodes);
        let hit = page.find_all("домой", false, 4, |_| true)[0];
        assert_eq!(page.start_position(hit), TextPosition { node: 1, offset: 0 });
        // The ellipsis chars all map to the single source char.
        let end = page.end_position(hit + "домой...".chars().count());
        assert_eq!(end, TextPosition { node: 1, offset: nodes[1].text.len() });
        let first = page.start_position(0);
        assert_eq!(first, TextPosition { node: 0, offset: 2 });
    }

    #[test]
    fn rejected_occurrences_do_not_count_towards_limit() {
        let page = PageText::build(&[TextNode::new("снег, снег, снег", 0)]);
        let all = page.find_all("снег", false, 8, |_| true);
        assert_eq!(all.as_slice(), &[0, 6, 12]);
        let later = page.find_all("снег", false, 1, |start| start > 0);
        assert_eq!(later.as_slice(), &[6]);
    }

    #[test]
    fn case_insensitive_search_uses_folded_text() {
        let page = PageText::build(&nodes());
        assert!(page.find_all("утро", false, 4, |_| true).is_empty());
        assert_eq!(page.find_all("утро", true, 4, |_| true).len(), 1);
    }
}
