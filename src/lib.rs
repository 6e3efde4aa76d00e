//! Reading-position tracking and description anchoring for EPUB readers.
//!
//! `epub-anchor` sits between a black-box EPUB renderer and a backend that
//! stores progress and serves extracted descriptions. It covers:
//!
//! - **Location index**: fixed-size break points for percentage and CFI math
//!   ([`LocationIndex`], cached through [`LocationIndexCache`])
//! - **Chapter mapping**: TOC/spine hrefs to backend chapter numbers
//!   ([`ChapterMapping`])
//! - **Position tracking**: relocation events with restore suppression
//!   ([`PositionTracker`])
//! - **Content anchoring**: locating free-text descriptions on the rendered
//!   page ([`ContentAnchor`], [`plan_highlights`])
//! - **Progress sync**: debounced, regression-guarded persistence
//!   ([`ProgressSync`])
//!
//! [`ReaderSession`] wires them together. Time is always injected as
//! milliseconds and storage through [`KeyValueStore`], so every component is
//! deterministic under test.
//!
//! ```rust
//! use epub_anchor::{ContentAnchor, Description, DescriptionKind, TextNode};
//!
//! let mut anchor = ContentAnchor::default();
//! let page = [TextNode::new("It was late. The lamps along the quay were already lit.", 0)];
//! let descriptions = [Description::new(
//!     "d1",
//!     DescriptionKind::Atmosphere,
//!     "The lamps along the quay were already lit.",
//! )];
//! let matches = anchor.anchor(&descriptions, &page);
//! assert_eq!(matches.len(), 1);
//! ```

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod anchor;
pub mod cfi;
pub mod chapter_loader;
pub mod chapter_map;
pub mod config;
pub mod description;
pub mod error;
pub mod location_index;
pub mod session;
pub mod store;
pub mod sync;
pub mod toc;
pub mod tracker;

mod ordinal;
mod xml;

pub use anchor::{
    extract_text_nodes, plan_highlights, AnchorConfig, AnchorMatch, ContentAnchor, FrameBudget,
    HighlightSlice, IdleDeadline, MatchStrategy, NoIdleTime, TextNode, TextPosition,
};
pub use cfi::{Cfi, CfiError};
pub use chapter_loader::{
    AbortSignal, CancelToken, ChapterLoader, ChapterRequest, DescriptionSource, LoaderConfig,
    NeverCancel,
};
pub use chapter_map::{ChapterMapping, ChapterMetadata, MappedEntry, MappingSource};
pub use config::ReaderConfig;
pub use description::{ChapterBundle, Description, DescriptionKind, GeneratedImage};
pub use error::{AnchorError, FetchError, IndexError, StoreError, SyncError};
pub use location_index::{
    fingerprint_bytes, BookSource, LocationIndex, LocationIndexCache, LocationIndexOptions,
    Locator, Section,
};
pub use session::{ReaderSession, SessionEffects};
pub use store::{CacheKey, CacheNamespace, KeyValueStore, MemoryStore};
pub use sync::{
    ExitFlush, FlushOutcome, ProgressRecord, ProgressRemote, ProgressSync, ScheduleOutcome,
    SyncConfig,
};
pub use toc::{Toc, TocEntry, TocLimits};
pub use tracker::{
    DisplayedPage, PositionContext, PositionTracker, PositionUpdate, ProgressSource,
    RelocatedEvent, RelocationOutcome, Rendition, SuppressReason, TrackerConfig, Viewport,
};
