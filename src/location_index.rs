//! Fixed-size location index for percentage math over a whole book.
//!
//! The index slices the book into `chunk_size`-char chunks and records the CFI
//! at each chunk start. Renderer-reported locators are placed between those
//! break points by CFI order, which gives a stable page count and percentage
//! independent of screen layout.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::anchor::{extract_text_nodes, TextNode};
use crate::cfi::Cfi;
use crate::error::{AnchorError, IndexError, StoreError};
use crate::store::{CacheKey, KeyValueStore};

const INDEX_SCHEMA_VERSION: u8 = 1;

/// Opaque renderer locator, normally an `epubcfi(...)` string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Parsed CFI form, for ordering.
    pub fn cfi(&self) -> Result<Cfi, AnchorError> {
        Ok(Cfi::parse(&self.0)?)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Locator {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Locator {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&Cfi> for Locator {
    fn from(value: &Cfi) -> Self {
        Self(value.to_string())
    }
}

/// Generation knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationIndexOptions {
    /// Characters per location.
    pub chunk_size: usize,
    /// Chunk size for the single retry after a failed generation.
    pub retry_chunk_size: usize,
    /// Hard cap on generated locations.
    pub max_locations: usize,
}

impl Default for LocationIndexOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1600,
            retry_chunk_size: 1000,
            max_locations: 200_000,
        }
    }
}

impl LocationIndexOptions {
    /// Tighter location cap for constrained hosts.
    pub fn low_memory() -> Self {
        Self {
            max_locations: 20_000,
            ..Self::default()
        }
    }

    fn with_chunk_size(&self, chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..self.clone()
        }
    }
}

/// Text of one spine item, ready for indexing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    pub href: String,
    /// Package-level CFI of the spine itemref, e.g. `/6/4[chap01]`.
    pub cfi_base: String,
    pub nodes: Vec<TextNode>,
}

impl Section {
    /// Build a section by walking its XHTML content document.
    pub fn from_xhtml(
        href: impl Into<String>,
        cfi_base: impl Into<String>,
        xhtml: &[u8],
    ) -> Result<Self, AnchorError> {
        Ok(Self {
            href: href.into(),
            cfi_base: cfi_base.into(),
            nodes: extract_text_nodes(xhtml)?,
        })
    }
}

/// A book whose sections can be read for index generation.
pub trait BookSource {
    /// Structural metadata (spine, manifest) has been parsed.
    fn is_ready(&self) -> bool;

    fn section_count(&self) -> usize;

    fn section(&self, index: usize) -> Result<Section, AnchorError>;

    /// Content fingerprint used to detect stale cached indexes.
    fn fingerprint(&self) -> Option<u32> {
        None
    }
}

/// CRC32 over a sequence of byte chunks, for [`BookSource::fingerprint`].
pub fn fingerprint_bytes<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

#[derive(Serialize, Deserialize)]
struct IndexEnvelope {
    version: u8,
    chunk_size: u32,
    fingerprint: Option<u32>,
    locators: Vec<String>,
}

/// Ordered break points covering the whole book. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationIndex {
    chunk_size: u32,
    fingerprint: Option<u32>,
    locators: Vec<Locator>,
    parsed: Vec<Cfi>,
}

impl LocationIndex {
    /// Walk every section and emit a break point at each section start and
    /// every `chunk_size` chars after it. Whitespace-only nodes are skipped.
    pub fn generate<B: BookSource + ?Sized>(
        book: &B,
        options: &LocationIndexOptions,
    ) -> Result<Self, AnchorError> {
        if !book.is_ready() {
            return Err(AnchorError::NotReady);
        }
        if options.chunk_size == 0 {
            return Err(AnchorError::Config("chunk_size must be positive".to_string()));
        }
        let chunk_size = u32::try_from(options.chunk_size)
            .map_err(|_| AnchorError::Config("chunk_size too large".to_string()))?;

        let mut parsed: Vec<Cfi> = Vec::new();
        for section_idx in 0..book.section_count() {
            let section = book.section(section_idx)?;
            let base = Cfi::parse(&section.cfi_base)?;
            let mut since_break: Option<usize> = None;
            for node in &section.nodes {
                if node.text.trim().is_empty() {
                    continue;
                }
                let mut utf16 = 0u32;
                for ch in node.text.chars() {
                    let due = match since_break {
                        None => true,
                        Some(count) => count >= options.chunk_size,
                    };
                    if due {
                        let cfi = Cfi::in_document(&base, &node.steps, utf16);
                        push_break(&mut parsed, cfi, options)?;
                        since_break = Some(0);
                    }
                    since_break = since_break.map(|count| count + 1);
                    utf16 += ch.len_utf16() as u32;
                }
            }
        }

        if parsed.is_empty() {
            return Err(IndexError::Empty.into());
        }
        let locators = parsed.iter().map(Locator::from).collect();
        log::debug!(
            "generated location index: {} locations at chunk {}",
            parsed.len(),
            chunk_size
        );
        Ok(Self {
            chunk_size,
            fingerprint: book.fingerprint(),
            locators,
            parsed,
        })
    }

    /// Decode and validate a blob produced by [`LocationIndex::save`].
    pub fn load(blob: &[u8]) -> Result<Self, IndexError> {
        match blob.first() {
            None => return Err(IndexError::Corrupt("empty blob".to_string())),
            Some(found) if *found != INDEX_SCHEMA_VERSION => {
                return Err(IndexError::Version {
                    found: *found,
                    expected: INDEX_SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }
        let envelope: IndexEnvelope =
            postcard::from_bytes(blob).map_err(|err| IndexError::Corrupt(err.to_string()))?;
        if envelope.chunk_size == 0 {
            return Err(IndexError::Corrupt("zero chunk size".to_string()));
        }
        if envelope.locators.is_empty() {
            return Err(IndexError::Empty);
        }
        let mut parsed = Vec::with_capacity(envelope.locators.len());
        for (idx, raw) in envelope.locators.iter().enumerate() {
            let cfi = Cfi::parse(raw)
                .map_err(|err| IndexError::Corrupt(format!("location {}: {}", idx, err)))?;
            if parsed.last().is_some_and(|prev: &Cfi| *prev > cfi) {
                return Err(IndexError::Corrupt(format!("location {} out of order", idx)));
            }
            parsed.push(cfi);
        }
        Ok(Self {
            chunk_size: envelope.chunk_size,
            fingerprint: envelope.fingerprint,
            locators: envelope.locators.into_iter().map(Locator).collect(),
            parsed,
        })
    }

    /// Postcard-encoded versioned envelope.
    pub fn save(&self) -> Result<Vec<u8>, IndexError> {
        let envelope = IndexEnvelope {
            version: INDEX_SCHEMA_VERSION,
            chunk_size: self.chunk_size,
            fingerprint: self.fingerprint,
            locators: self.locators.iter().map(|l| l.0.clone()).collect(),
        };
        postcard::to_allocvec(&envelope).map_err(|err| IndexError::Encode(err.to_string()))
    }

    pub fn total(&self) -> usize {
        self.locators.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    pub fn fingerprint(&self) -> Option<u32> {
        self.fingerprint
    }

    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    /// Index of the last break point at or before `locator`.
    ///
    /// Locators before the first break point resolve to page 0.
    pub fn page_from_locator(&self, locator: &Locator) -> Option<usize> {
        let cfi = Cfi::parse(locator.as_str()).ok()?;
        let after = self.parsed.partition_point(|point| *point <= cfi);
        Some(after.saturating_sub(1))
    }

    /// Fraction in `[0, 1]`; the last break point reports `1.0`.
    pub fn percentage_from_locator(&self, locator: &Locator) -> Option<f32> {
        let page = self.page_from_locator(locator)?;
        let last = self.total().saturating_sub(1);
        if last == 0 {
            return Some(0.0);
        }
        Some((page as f32 / last as f32).clamp(0.0, 1.0))
    }

    /// Nearest break point for a fraction, clamped to `[0, 1]`.
    pub fn locator_from_percentage(&self, fraction: f32) -> Option<&Locator> {
        if !fraction.is_finite() {
            return None;
        }
        let last = self.total().saturating_sub(1);
        let idx = (fraction.clamp(0.0, 1.0) * last as f32).round() as usize;
        self.locators.get(idx.min(last))
    }
}

fn push_break(
    parsed: &mut Vec<Cfi>,
    cfi: Cfi,
    options: &LocationIndexOptions,
) -> Result<(), IndexError> {
    if parsed.len() >= options.max_locations {
        return Err(IndexError::LimitExceeded {
            kind: "max_locations",
            actual: parsed.len() + 1,
            limit: options.max_locations,
        });
    }
    parsed.push(cfi);
    Ok(())
}

/// Cache front for [`LocationIndex`] that heals itself on bad entries.
pub struct LocationIndexCache<S> {
    store: S,
    options: LocationIndexOptions,
}

impl<S: KeyValueStore> LocationIndexCache<S> {
    pub fn new(store: S, options: LocationIndexOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &LocationIndexOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cached index for `key` if valid for `book`, otherwise a fresh one.
    ///
    /// Invalid or stale entries are deleted before regenerating. A failed
    /// generation is retried once with `retry_chunk_size`. Failing to save
    /// the new index is logged and does not fail the call.
    pub fn load_or_generate<B: BookSource + ?Sized>(
        &self,
        key: &CacheKey,
        book: &B,
    ) -> Result<LocationIndex, AnchorError> {
        if let Some(index) = self.load_cached(key, book) {
            return Ok(index);
        }

        let index = match LocationIndex::generate(book, &self.options) {
            Ok(index) => index,
            Err(AnchorError::NotReady) => return Err(AnchorError::NotReady),
            Err(err) if self.options.retry_chunk_size != self.options.chunk_size => {
                log::warn!(
                    "location generation failed at chunk {} ({}); retrying at chunk {}",
                    self.options.chunk_size,
                    err,
                    self.options.retry_chunk_size
                );
                let retry = self.options.with_chunk_size(self.options.retry_chunk_size);
                LocationIndex::generate(book, &retry)?
            }
            Err(err) => return Err(err),
        };

        match index.save() {
            Ok(blob) => {
                if let Err(err) = self.store.set(key, &blob) {
                    log::warn!("failed to persist location index {}: {}", key.storage_key(), err);
                }
            }
            Err(err) => log::warn!("failed to encode location index: {}", err),
        }
        Ok(index)
    }

    fn load_cached<B: BookSource + ?Sized>(
        &self,
        key: &CacheKey,
        book: &B,
    ) -> Option<LocationIndex> {
        let blob = match self.store.get(key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("location cache read failed for {}: {}", key.storage_key(), err);
                return None;
            }
        };
        let verdict = LocationIndex::load(&blob).and_then(|index| {
            let expected = book.fingerprint();
            if expected.is_some() && index.fingerprint() != expected {
                return Err(IndexError::Stale);
            }
            let chunk = index.chunk_size();
            if chunk != self.options.chunk_size && chunk != self.options.retry_chunk_size {
                return Err(IndexError::Stale);
            }
            Ok(index)
        });
        match verdict {
            Ok(index) => Some(index),
            Err(err) => {
                log::warn!(
                    "discarding cached location index {}: {}",
                    key.storage_key(),
                    err
                );
                if let Err(err) = self.store.delete(key) {
                    log::warn!("failed to delete bad location index: {}", err);
                }
                None
            }
        }
    }

    /// Drop the cached index for `key`.
    pub fn clear(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.store.delete(key)
    }
}
