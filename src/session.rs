//! Event handlers tying the position and anchoring components together.
//!
//! The host owns the rendering engine and the network. It forwards renderer
//! events here and acts on the returned effects: start a chapter load, apply
//! highlight slices, wait for the next tick.

use crate::anchor::{
    plan_highlights, AnchorMatch, ContentAnchor, HighlightSlice, IdleDeadline, TextNode,
};
use crate::chapter_map::ChapterMapping;
use crate::config::ReaderConfig;
use crate::description::ChapterBundle;
use crate::error::{AnchorError, SyncError};
use crate::location_index::{LocationIndex, Locator};
use crate::store::KeyValueStore;
use crate::sync::{
    ExitFlush, FlushOutcome, ProgressRecord, ProgressRemote, ProgressSync, ScheduleOutcome,
};
use crate::tracker::{
    PositionContext, PositionTracker, RelocatedEvent, RelocationOutcome, Rendition, Viewport,
};

/// What the host should do after a relocation.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionEffects {
    pub outcome: RelocationOutcome,
    /// Set when the update was handed to progress sync.
    pub scheduled: Option<ScheduleOutcome>,
    /// Chapter whose descriptions should be loaded now.
    pub load_chapter: Option<u32>,
}

pub struct ReaderSession<R, S> {
    index: Option<LocationIndex>,
    chapters: Option<ChapterMapping>,
    tracker: PositionTracker,
    anchor: ContentAnchor,
    sync: ProgressSync<R, S>,
    current_chapter: Option<u32>,
    bundle: Option<ChapterBundle>,
    last_matches: Vec<AnchorMatch>,
}

impl<R: ProgressRemote, S: KeyValueStore> ReaderSession<R, S> {
    pub fn new(config: &ReaderConfig, sync: ProgressSync<R, S>) -> Self {
        Self {
            index: None,
            chapters: None,
            tracker: PositionTracker::new(config.tracker.clone()),
            anchor: ContentAnchor::new(config.anchor.clone()),
            sync,
            current_chapter: None,
            bundle: None,
            last_matches: Vec::new(),
        }
    }

    /// Install the index once generation or cache load finishes.
    pub fn set_location_index(&mut self, index: LocationIndex) {
        self.index = Some(index);
    }

    pub fn location_index(&self) -> Option<&LocationIndex> {
        self.index.as_ref()
    }

    pub fn set_chapter_mapping(&mut self, mapping: ChapterMapping) {
        self.chapters = Some(mapping);
    }

    pub fn chapter_mapping(&self) -> Option<&ChapterMapping> {
        self.chapters.as_ref()
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PositionTracker {
        &mut self.tracker
    }

    pub fn anchor_mut(&mut self) -> &mut ContentAnchor {
        &mut self.anchor
    }

    pub fn sync(&self) -> &ProgressSync<R, S> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut ProgressSync<R, S> {
        &mut self.sync
    }

    /// Chapter on screen, including positions reached by a restore.
    pub fn current_chapter(&self) -> Option<u32> {
        self.current_chapter
    }

    pub fn bundle(&self) -> Option<&ChapterBundle> {
        self.bundle.as_ref()
    }

    /// Matches from the most recent render pass.
    pub fn last_matches(&self) -> &[AnchorMatch] {
        &self.last_matches
    }

    /// Install descriptions for a chapter. Bundles for a chapter other than the
    /// current one are ignored; returns whether the bundle was kept.
    pub fn set_bundle(&mut self, bundle: ChapterBundle) -> bool {
        if let Some(current) = self.current_chapter() {
            if current != bundle.chapter {
                log::debug!(
                    "ignoring bundle for chapter {} while reading chapter {}",
                    bundle.chapter,
                    current
                );
                return false;
            }
        }
        self.bundle = Some(bundle);
        true
    }

    /// The reader explicitly jumped backwards (TOC click, "start over").
    pub fn allow_backward_jump(&mut self) {
        self.sync.allow_backward_jump();
    }

    pub fn handle_relocated(
        &mut self,
        event: &RelocatedEvent,
        viewport: Option<&Viewport>,
        now_ms: u64,
    ) -> SessionEffects {
        let ctx = PositionContext {
            index: self.index.as_ref(),
            chapters: self.chapters.as_ref(),
        };
        let outcome = self.tracker.on_relocated(event, viewport, ctx);

        // Suppressed landings still put a chapter on screen.
        let mut load_chapter = None;
        if let Some(chapter) = outcome.update().chapter_number {
            if self.current_chapter != Some(chapter) {
                self.current_chapter = Some(chapter);
                if self.bundle.as_ref().is_none_or(|bundle| bundle.chapter != chapter) {
                    if self.bundle.take().is_some() {
                        self.anchor.clear_cache();
                    }
                    load_chapter = Some(chapter);
                }
            }
        }

        let scheduled = outcome
            .accepted()
            .map(|update| self.sync.schedule(ProgressRecord::from_update(update), now_ms));
        SessionEffects {
            outcome,
            scheduled,
            load_chapter,
        }
    }

    /// Anchor the current bundle onto a freshly rendered page.
    pub fn handle_rendered(&mut self, nodes: &[TextNode]) -> Vec<HighlightSlice> {
        self.render_pass(nodes, None)
    }

    /// Same as [`ReaderSession::handle_rendered`], letting the fuzzy fallback
    /// use whatever idle time `deadline` still has.
    pub fn handle_rendered_with_idle(
        &mut self,
        nodes: &[TextNode],
        deadline: &dyn IdleDeadline,
    ) -> Vec<HighlightSlice> {
        self.render_pass(nodes, Some(deadline))
    }

    fn render_pass(
        &mut self,
        nodes: &[TextNode],
        deadline: Option<&dyn IdleDeadline>,
    ) -> Vec<HighlightSlice> {
        let Some(bundle) = self.bundle.as_ref() else {
            self.last_matches.clear();
            return Vec::new();
        };
        let matches = match deadline {
            Some(deadline) => self.anchor.anchor_with_idle(&bundle.descriptions, nodes, deadline),
            None => self.anchor.anchor(&bundle.descriptions, nodes),
        };
        let slices = plan_highlights(&matches, nodes, Some(bundle));
        self.last_matches = matches;
        slices
    }

    /// Reopen the book at `record`.
    ///
    /// Falls back to the record's percentage when its CFI does not parse and
    /// an index is available.
    pub fn restore<T: Rendition + ?Sized>(
        &mut self,
        rendition: &mut T,
        record: &ProgressRecord,
    ) -> Result<(), AnchorError> {
        let ctx = PositionContext {
            index: self.index.as_ref(),
            chapters: self.chapters.as_ref(),
        };
        let scroll = Some(record.scroll_offset_percent);
        let locator = Locator::new(record.cfi.as_str());
        match locator.cfi() {
            Ok(_) => self.tracker.go_to(rendition, ctx, &locator, scroll),
            Err(err) if ctx.index.is_some() => {
                log::warn!(
                    "saved cfi {:?} unusable ({}), restoring by percentage",
                    record.cfi,
                    err
                );
                self.tracker
                    .go_to_percentage(rendition, ctx, record.progress_percent / 100.0, scroll)
            }
            Err(err) => Err(err),
        }
    }

    /// Jump to `fraction` of the book through the location index.
    pub fn go_to_percentage<T: Rendition + ?Sized>(
        &mut self,
        rendition: &mut T,
        fraction: f32,
        scroll_offset_percent: Option<f32>,
    ) -> Result<(), AnchorError> {
        let ctx = PositionContext {
            index: self.index.as_ref(),
            chapters: self.chapters.as_ref(),
        };
        self.tracker
            .go_to_percentage(rendition, ctx, fraction, scroll_offset_percent)
    }

    /// Restore the last persisted record, or show the start of the book.
    pub fn restore_last<T: Rendition + ?Sized>(
        &mut self,
        rendition: &mut T,
    ) -> Result<(), AnchorError> {
        match self.sync.last_persisted().cloned() {
            Some(record) => self.restore(rendition, &record),
            None => {
                if !rendition.is_ready() {
                    return Err(AnchorError::NotReady);
                }
                rendition.display(None)
            }
        }
    }

    /// Drive debounced writes.
    pub fn tick(&mut self, now_ms: u64) -> Result<FlushOutcome, SyncError> {
        self.sync.poll(now_ms)
    }

    /// Page is going away: push out whatever is pending.
    pub fn close(&mut self) -> ExitFlush {
        self.sync.flush_on_exit()
    }
}
