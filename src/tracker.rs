//! Relocation tracking with restore-vs-real-turn disambiguation.
//!
//! Displaying a saved locator makes the renderer fire a relocation for the
//! block it actually landed on, which is close to but rarely equal to the
//! saved CFI. That first event must not be mistaken for the reader turning a
//! page, or it would overwrite the precise saved position with a rounded one.

use serde::{Deserialize, Serialize};

use crate::anchor::TextNode;
use crate::chapter_map::ChapterMapping;
use crate::error::{AnchorError, IndexError};
use crate::location_index::{LocationIndex, Locator};

/// Page counter as reported by paginated renderers (1-based page).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayedPage {
    pub page: u32,
    pub total: u32,
}

/// Renderer "relocated" payload.
#[derive(Clone, Debug, PartialEq)]
pub struct RelocatedEvent {
    pub start: Locator,
    pub end: Option<Locator>,
    /// Href of the section containing `start`.
    pub href: Option<String>,
    /// Renderer's own rough fraction in `[0, 1]`, if it has one.
    pub percentage: Option<f32>,
    pub displayed: Option<DisplayedPage>,
}

impl RelocatedEvent {
    pub fn new(start: impl Into<Locator>) -> Self {
        Self {
            start: start.into(),
            end: None,
            href: None,
            percentage: None,
            displayed: None,
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

/// Scroll geometry of the rendered container, in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl Viewport {
    fn max_scroll(&self) -> f32 {
        self.scroll_height - self.client_height
    }

    /// Scroll position within the page, `0..=100`; 0 when nothing scrolls.
    pub fn scroll_offset_percent(&self) -> f32 {
        let max = self.max_scroll();
        if !max.is_finite() || max <= 0.0 {
            return 0.0;
        }
        normalize_percent(self.scroll_top / max * 100.0)
    }

    /// `scroll_top` that puts the container at `percent` of its scroll range.
    pub fn scroll_top_for(&self, percent: f32) -> f32 {
        let max = self.max_scroll();
        if !max.is_finite() || max <= 0.0 {
            return 0.0;
        }
        max * normalize_percent(percent) / 100.0
    }
}

/// Where `progress_percent` came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressSource {
    LocationIndex,
    /// Renderer's own estimate; used while no index is available.
    Renderer,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PositionUpdate {
    pub locator: Locator,
    pub progress_percent: f32,
    pub scroll_offset_percent: f32,
    pub chapter_number: Option<u32>,
    /// Chapter differs from the last accepted update.
    pub chapter_changed: bool,
    pub source: ProgressSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    /// Event reports exactly the locator just restored.
    RestoredLocator,
    /// Event lands within the restore tolerance of the restored locator.
    WithinTolerance,
    /// Host asked to ignore the next relocation.
    SkipRequested,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RelocationOutcome {
    Accepted(PositionUpdate),
    Suppressed {
        update: PositionUpdate,
        reason: SuppressReason,
    },
}

impl RelocationOutcome {
    pub fn accepted(&self) -> Option<&PositionUpdate> {
        match self {
            Self::Accepted(update) => Some(update),
            Self::Suppressed { .. } => None,
        }
    }

    pub fn update(&self) -> &PositionUpdate {
        match self {
            Self::Accepted(update) | Self::Suppressed { update, .. } => update,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Read-only inputs shared by the tracker's handlers.
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionContext<'a> {
    pub index: Option<&'a LocationIndex>,
    pub chapters: Option<&'a ChapterMapping>,
}

/// The rendering engine as seen by the tracker and session.
pub trait Rendition {
    fn is_ready(&self) -> bool;

    /// Show `target`, or the start of the book for `None`.
    fn display(&mut self, target: Option<&Locator>) -> Result<(), AnchorError>;

    fn next(&mut self) -> Result<(), AnchorError>;

    fn prev(&mut self) -> Result<(), AnchorError>;

    fn current_location(&self) -> Option<Locator>;

    fn viewport(&self) -> Option<Viewport>;

    fn set_scroll_top(&mut self, scroll_top: f32);

    /// Text nodes of the currently rendered page.
    fn contents(&self) -> Vec<TextNode>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Percentage points around a restored locator treated as "the same".
    pub restore_tolerance_percent: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            restore_tolerance_percent: 3.0,
        }
    }
}

#[derive(Clone, Debug)]
struct RestoreMarker {
    locator: Locator,
    percent: Option<f32>,
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    config: TrackerConfig,
    restoring: Option<RestoreMarker>,
    skip_next: bool,
    last_accepted: Option<PositionUpdate>,
}

impl PositionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn last_accepted(&self) -> Option<&PositionUpdate> {
        self.last_accepted.as_ref()
    }

    /// A restore is waiting for its relocation event.
    pub fn is_restoring(&self) -> bool {
        self.restoring.is_some()
    }

    /// Ignore the next relocation, whatever it reports.
    pub fn skip_next_relocation(&mut self) {
        self.skip_next = true;
    }

    pub fn on_relocated(
        &mut self,
        event: &RelocatedEvent,
        viewport: Option<&Viewport>,
        ctx: PositionContext<'_>,
    ) -> RelocationOutcome {
        let update = self.compute_update(event, viewport, ctx);
        let marker = self.restoring.take();

        if self.skip_next {
            self.skip_next = false;
            log::debug!("relocation to {} skipped on request", event.start);
            return RelocationOutcome::Suppressed {
                update,
                reason: SuppressReason::SkipRequested,
            };
        }

        if let Some(marker) = marker {
            if let Some(reason) = self.restore_match(&marker, event, &update) {
                log::debug!(
                    "relocation to {} suppressed after restoring {} ({:?})",
                    event.start,
                    marker.locator,
                    reason
                );
                return RelocationOutcome::Suppressed { update, reason };
            }
        }

        self.last_accepted = Some(update.clone());
        RelocationOutcome::Accepted(update)
    }

    fn restore_match(
        &self,
        marker: &RestoreMarker,
        event: &RelocatedEvent,
        update: &PositionUpdate,
    ) -> Option<SuppressReason> {
        if marker.locator == event.start {
            return Some(SuppressReason::RestoredLocator);
        }
        if let (Ok(restored), Ok(reported)) = (marker.locator.cfi(), event.start.cfi()) {
            if restored == reported {
                return Some(SuppressReason::RestoredLocator);
            }
        }
        let restored_percent = marker.percent?;
        if update.source != ProgressSource::LocationIndex {
            return None;
        }
        let distance = (update.progress_percent - restored_percent).abs();
        (distance <= self.config.restore_tolerance_percent)
            .then_some(SuppressReason::WithinTolerance)
    }

    fn compute_update(
        &self,
        event: &RelocatedEvent,
        viewport: Option<&Viewport>,
        ctx: PositionContext<'_>,
    ) -> PositionUpdate {
        let (progress_percent, source) = progress_for(event, ctx.index);
        let chapter_number = match (ctx.chapters, event.href.as_deref()) {
            (Some(chapters), Some(href)) => chapters.chapter_number_for(href),
            _ => None,
        };
        let chapter_changed = match &self.last_accepted {
            Some(last) => last.chapter_number != chapter_number,
            None => chapter_number.is_some(),
        };
        PositionUpdate {
            locator: event.start.clone(),
            progress_percent,
            scroll_offset_percent: viewport.map(Viewport::scroll_offset_percent).unwrap_or(0.0),
            chapter_number,
            chapter_changed,
            source,
        }
    }

    /// Restore `locator`, then scroll to `scroll_offset_percent` of the page.
    ///
    /// The next relocation event is checked against `locator` and suppressed
    /// when it reports the same place.
    pub fn go_to<R: Rendition + ?Sized>(
        &mut self,
        rendition: &mut R,
        ctx: PositionContext<'_>,
        locator: &Locator,
        scroll_offset_percent: Option<f32>,
    ) -> Result<(), AnchorError> {
        if !rendition.is_ready() {
            return Err(AnchorError::NotReady);
        }
        let percent = ctx
            .index
            .filter(|index| index.total() > 0)
            .and_then(|index| index.percentage_from_locator(locator))
            .map(|fraction| fraction * 100.0);
        self.restoring = Some(RestoreMarker {
            locator: locator.clone(),
            percent,
        });
        if let Err(err) = rendition.display(Some(locator)) {
            self.restoring = None;
            return Err(err);
        }
        if let Some(percent) = scroll_offset_percent.filter(|p| *p > 0.0) {
            if let Some(viewport) = rendition.viewport() {
                rendition.set_scroll_top(viewport.scroll_top_for(percent));
            }
        }
        Ok(())
    }

    /// Restore the break point nearest to `fraction` of the book.
    pub fn go_to_percentage<R: Rendition + ?Sized>(
        &mut self,
        rendition: &mut R,
        ctx: PositionContext<'_>,
        fraction: f32,
        scroll_offset_percent: Option<f32>,
    ) -> Result<(), AnchorError> {
        let index = ctx.index.ok_or(AnchorError::NotReady)?;
        let locator = index
            .locator_from_percentage(fraction)
            .cloned()
            .ok_or(IndexError::Empty)?;
        self.go_to(rendition, ctx, &locator, scroll_offset_percent)
    }
}

fn progress_for(event: &RelocatedEvent, index: Option<&LocationIndex>) -> (f32, ProgressSource) {
    if let Some(index) = index.filter(|index| index.total() > 0) {
        if let Some(fraction) = index.percentage_from_locator(&event.start) {
            return (normalize_percent(fraction * 100.0), ProgressSource::LocationIndex);
        }
    }
    let rough = match (event.percentage, event.displayed) {
        (Some(fraction), _) if fraction.is_finite() => fraction * 100.0,
        (_, Some(displayed)) if displayed.total > 0 => {
            displayed.page as f32 / displayed.total as f32 * 100.0
        }
        _ => 0.0,
    };
    (normalize_percent(rough), ProgressSource::Renderer)
}

fn normalize_percent(value: f32) -> f32 {
    if value.is_finite() {
        return value.clamp(0.0, 100.0);
    }
    0.0
}
