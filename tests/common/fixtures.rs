use std::collections::VecDeque;

use epub_anchor::{
    fingerprint_bytes, AnchorError, BookSource, Cfi, ChapterMetadata, Locator, ProgressRecord,
    ProgressRemote, RelocatedEvent, Rendition, Section, SyncError, TextNode, Toc, TocEntry,
    Viewport,
};

const WORDS: &[&str] = &[
    "river", "lantern", "stone", "quiet", "harbor", "winter", "glass", "orchard", "window",
    "bridge", "ember", "salt", "meadow", "copper", "thread", "shadow", "garden", "tower",
    "morning", "silver", "cellar", "willow", "north", "paper", "candle", "iron", "marsh",
    "whistle", "rain", "hollow", "ferry", "signal", "amber", "field", "harvest", "chapel",
];

/// Deterministic multi-section book made of fixed-length paragraphs.
#[derive(Clone, Debug)]
pub struct SyntheticBook {
    pub sections: usize,
    pub paragraphs_per_section: usize,
    pub paragraph_chars: usize,
    pub ready: bool,
    pub revision: u32,
}

impl SyntheticBook {
    pub fn new(sections: usize, paragraphs_per_section: usize, paragraph_chars: usize) -> Self {
        Self {
            sections,
            paragraphs_per_section,
            paragraph_chars,
            ready: true,
            revision: 1,
        }
    }

    /// 4 sections of 50 000 chars, 200 000 in total.
    pub fn standard() -> Self {
        Self::new(4, 100, 500)
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn total_chars(&self) -> usize {
        self.sections * self.paragraphs_per_section * self.paragraph_chars
    }

    pub fn href(&self, section: usize) -> String {
        format!("text/chapter{:02}.xhtml", section + 1)
    }

    pub fn cfi_base(&self, section: usize) -> String {
        format!("/6/{}", (section + 1) * 2)
    }

    pub fn spine_hrefs(&self) -> Vec<String> {
        (0..self.sections).map(|idx| self.href(idx)).collect()
    }

    pub fn toc(&self) -> Toc {
        Toc::new(
            (0..self.sections)
                .map(|idx| TocEntry::new(format!("Chapter {}", idx + 1), self.href(idx)))
                .collect(),
        )
    }

    pub fn chapter_metadata(&self) -> Vec<ChapterMetadata> {
        (0..self.sections)
            .map(|idx| ChapterMetadata::new(idx as u32 + 1, format!("Chapter {}", idx + 1)))
            .collect()
    }

    pub fn node_steps(paragraph: usize) -> [u32; 3] {
        [4, (paragraph as u32 + 1) * 2, 1]
    }

    /// Exactly `paragraph_chars` ASCII chars of prose, ending in a period.
    pub fn paragraph(&self, section: usize, paragraph: usize) -> String {
        let mut seed = (section as u64 + 1) * 1_000_003 + paragraph as u64 * 7_919 + 17;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (seed >> 33) as usize
        };
        let mut out = if paragraph == 0 {
            format!("Chapter {}. ", section + 1)
        } else {
            String::new()
        };
        while out.len() < self.paragraph_chars {
            let words = 6 + next() % 9;
            for idx in 0..words {
                let word = WORDS[next() % WORDS.len()];
                if idx == 0 {
                    let mut chars = word.chars();
                    if let Some(first) = chars.next() {
                        out.push(first.to_ascii_uppercase());
                        out.push_str(chars.as_str());
                    }
                } else {
                    out.push(' ');
                    out.push_str(word);
                }
            }
            out.push_str(". ");
        }
        out.truncate(self.paragraph_chars.saturating_sub(1));
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        while out.len() < self.paragraph_chars.saturating_sub(1) {
            out.push('x');
        }
        out.push('.');
        out
    }

    pub fn section_nodes(&self, section: usize) -> Vec<TextNode> {
        (0..self.paragraphs_per_section)
            .map(|p| {
                TextNode::new(self.paragraph(section, p), p as u32)
                    .with_steps(&Self::node_steps(p))
            })
            .collect()
    }

    pub fn locator(&self, section: usize, paragraph: usize, offset: usize) -> Locator {
        let steps = Self::node_steps(paragraph);
        Locator::new(format!(
            "epubcfi({}!/{}/{}/{}:{})",
            self.cfi_base(section),
            steps[0],
            steps[1],
            steps[2],
            offset
        ))
    }

    /// `(section, paragraph, offset)` for a global char position.
    pub fn split_position(&self, position: usize) -> (usize, usize, usize) {
        let section_chars = self.paragraphs_per_section * self.paragraph_chars;
        let position = position.min(self.total_chars().saturating_sub(1));
        let section = position / section_chars;
        let within = position % section_chars;
        (section, within / self.paragraph_chars, within % self.paragraph_chars)
    }

    /// Global char position of a locator this book produced.
    pub fn position_of(&self, locator: &Locator) -> Option<usize> {
        let cfi = Cfi::parse(locator.as_str()).ok()?;
        let section = (cfi.spine_step()? / 2).checked_sub(1)? as usize;
        let first_local = cfi.steps().iter().position(|step| step.indirect)?;
        let paragraph = (cfi.steps().get(first_local + 1)?.index / 2).checked_sub(1)? as usize;
        let offset = cfi.offset().unwrap_or(0) as usize;
        Some(
            section * self.paragraphs_per_section * self.paragraph_chars
                + paragraph * self.paragraph_chars
                + offset,
        )
    }
}

impl BookSource for SyntheticBook {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn section_count(&self) -> usize {
        self.sections
    }

    fn section(&self, index: usize) -> Result<Section, AnchorError> {
        if index >= self.sections {
            return Err(AnchorError::Section {
                index,
                message: "out of range".to_string(),
            });
        }
        Ok(Section {
            href: self.href(index),
            cfi_base: self.cfi_base(index),
            nodes: self.section_nodes(index),
        })
    }

    fn fingerprint(&self) -> Option<u32> {
        let revision = self.revision.to_le_bytes();
        let shape = (self.total_chars() as u64).to_le_bytes();
        Some(fingerprint_bytes([&revision[..], &shape[..]]))
    }
}

/// Renderer stand-in: a cursor over a [`SyntheticBook`].
///
/// `display` lands on the start of the enclosing paragraph, the way real
/// renderers round to the nearest block. Every move queues a relocation event.
pub struct FakeRendition {
    pub book: SyntheticBook,
    pub ready: bool,
    pub page_chars: usize,
    pub cursor: usize,
    pub viewport: Viewport,
    pub events: VecDeque<RelocatedEvent>,
    pub displayed: Vec<Option<Locator>>,
}

impl FakeRendition {
    pub fn new(book: SyntheticBook) -> Self {
        Self {
            book,
            ready: true,
            page_chars: 800,
            cursor: 0,
            viewport: Viewport {
                scroll_top: 0.0,
                scroll_height: 2400.0,
                client_height: 800.0,
            },
            events: VecDeque::new(),
            displayed: Vec::new(),
        }
    }

    pub fn take_event(&mut self) -> Option<RelocatedEvent> {
        self.events.pop_front()
    }

    fn relocate(&mut self) {
        let (section, paragraph, offset) = self.book.split_position(self.cursor);
        let fraction = self.cursor as f32 / self.book.total_chars().max(1) as f32;
        let mut event = RelocatedEvent::new(self.book.locator(section, paragraph, offset))
            .with_href(self.book.href(section));
        event.percentage = Some(fraction);
        self.events.push_back(event);
    }
}

impl Rendition for FakeRendition {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn display(&mut self, target: Option<&Locator>) -> Result<(), AnchorError> {
        if !self.ready {
            return Err(AnchorError::NotReady);
        }
        self.displayed.push(target.cloned());
        let position = match target {
            Some(locator) => self
                .book
                .position_of(locator)
                .ok_or_else(|| AnchorError::Rendition(format!("cannot display {}", locator)))?,
            None => 0,
        };
        self.cursor = position - position % self.book.paragraph_chars;
        self.viewport.scroll_top = 0.0;
        self.relocate();
        Ok(())
    }

    fn next(&mut self) -> Result<(), AnchorError> {
        let last = self.book.total_chars().saturating_sub(1);
        self.cursor = (self.cursor + self.page_chars).min(last);
        self.relocate();
        Ok(())
    }

    fn prev(&mut self) -> Result<(), AnchorError> {
        self.cursor = self.cursor.saturating_sub(self.page_chars);
        self.relocate();
        Ok(())
    }

    fn current_location(&self) -> Option<Locator> {
        let (section, paragraph, offset) = self.book.split_position(self.cursor);
        Some(self.book.locator(section, paragraph, offset))
    }

    fn viewport(&self) -> Option<Viewport> {
        Some(self.viewport)
    }

    fn set_scroll_top(&mut self, scroll_top: f32) {
        self.viewport.scroll_top = scroll_top;
    }

    fn contents(&self) -> Vec<TextNode> {
        let (section, first, _) = self.book.split_position(self.cursor);
        let end = self.cursor + self.page_chars;
        let (end_section, mut last, _) = self.book.split_position(end);
        if end_section != section {
            last = self.book.paragraphs_per_section - 1;
        }
        (first..=last)
            .map(|p| {
                TextNode::new(self.book.paragraph(section, p), p as u32)
                    .with_steps(&SyntheticBook::node_steps(p))
            })
            .collect()
    }
}

/// Progress remote that records every delivery.
#[derive(Default)]
pub struct RecordingRemote {
    pub writes: Vec<ProgressRecord>,
    pub keepalives: Vec<ProgressRecord>,
    pub beacons: Vec<ProgressRecord>,
    pub fail_writes: u32,
    pub offline: bool,
}

impl ProgressRemote for RecordingRemote {
    fn write(&mut self, record: &ProgressRecord) -> Result<(), SyncError> {
        if self.offline {
            return Err(SyncError::Remote("offline".to_string()));
        }
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(SyncError::Remote("503 service unavailable".to_string()));
        }
        self.writes.push(record.clone());
        Ok(())
    }

    fn write_keepalive(&mut self, record: &ProgressRecord) -> Result<(), SyncError> {
        if self.offline {
            return Err(SyncError::Remote("offline".to_string()));
        }
        self.keepalives.push(record.clone());
        Ok(())
    }

    fn send_beacon(&mut self, record: &ProgressRecord) -> bool {
        self.beacons.push(record.clone());
        true
    }
}
