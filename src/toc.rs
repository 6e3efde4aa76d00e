//! Table-of-contents parsing for chapter mapping.
//!
//! Supports EPUB 3.x XHTML navigation documents (`epub:type="toc"`) and the
//! EPUB 2.0 NCX `navMap`. Page lists and landmarks are ignored; only the
//! chapter tree matters here.
//!
//! ```rust,no_run
//! use epub_anchor::toc::Toc;
//!
//! # fn example() -> Result<(), epub_anchor::AnchorError> {
//! let toc = Toc::parse(b"<ncx>...</ncx>")?;
//! for entry in toc.flatten() {
//!     println!("{} {} -> {}", entry.depth, entry.label, entry.href);
//! }
//! # Ok(())
//! # }
//! ```

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};

use crate::error::AnchorError;
use crate::xml::{attribute, local_name, resolve_entity};

/// Limits for TOC parsing and structure growth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TocLimits {
    /// Maximum number of entries across the whole tree.
    pub max_entries: usize,
    /// Maximum nesting depth.
    pub max_depth: usize,
    /// Maximum UTF-8 byte length for labels.
    pub max_label_bytes: usize,
    /// Maximum UTF-8 byte length for hrefs.
    pub max_href_bytes: usize,
}

impl Default for TocLimits {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            max_depth: 64,
            max_label_bytes: 4096,
            max_href_bytes: 4096,
        }
    }
}

impl TocLimits {
    /// Tighter bounds for memory-constrained hosts.
    pub fn low_memory() -> Self {
        Self {
            max_entries: 1024,
            max_depth: 32,
            max_label_bytes: 1024,
            max_href_bytes: 2048,
        }
    }
}

/// One TOC entry, possibly with nested sub-entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocEntry {
    /// Display label.
    pub label: String,
    /// Content href, relative to the package, possibly with a fragment.
    pub href: String,
    /// Nested entries (sections within a chapter, chapters within a part).
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TocEntry>) -> Self {
        self.children = children;
        self
    }
}

/// Borrowed view of an entry in document order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlatTocEntry<'a> {
    pub depth: usize,
    pub label: &'a str,
    pub href: &'a str,
}

/// Parsed table of contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Toc {
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn new(entries: Vec<TocEntry>) -> Self {
        Self { entries }
    }

    /// Parse either format, detecting NCX by its root element.
    pub fn parse(content: &[u8]) -> Result<Self, AnchorError> {
        Self::parse_with_limits(content, TocLimits::default())
    }

    pub fn parse_with_limits(content: &[u8], limits: TocLimits) -> Result<Self, AnchorError> {
        let head = &content[..content.len().min(512)];
        if head.windows(4).any(|w| w.eq_ignore_ascii_case(b"<ncx")) {
            Self::parse_ncx_with_limits(content, limits)
        } else {
            Self::parse_nav_xhtml_with_limits(content, limits)
        }
    }

    /// Parse an EPUB 3.x XHTML navigation document.
    pub fn parse_nav_xhtml(content: &[u8]) -> Result<Self, AnchorError> {
        Self::parse_nav_xhtml_with_limits(content, TocLimits::default())
    }

    pub fn parse_nav_xhtml_with_limits(
        content: &[u8],
        limits: TocLimits,
    ) -> Result<Self, AnchorError> {
        let mut reader = Reader::from_reader(content);
        reader.config_mut().trim_text(false);
        let mut buf = Vec::with_capacity(256);
        let mut tree = TreeBuilder::new(limits);
        let mut in_toc = false;
        let mut done = false;
        let mut label_depth = 0usize;

        while !done {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match local_name(e.name().as_ref()).as_slice() {
                    b"nav" => {
                        in_toc = attribute(&reader, &e, b"type")
                            .is_some_and(|kind| kind.split_whitespace().any(|k| k == "toc"));
                    }
                    b"li" if in_toc => tree.open()?,
                    b"a" | b"span" if in_toc => {
                        label_depth += 1;
                        if let Some(href) = attribute(&reader, &e, b"href") {
                            tree.set_href(href)?;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) if in_toc && local_name(e.name().as_ref()) == b"a" => {
                    if let Some(href) = attribute(&reader, &e, b"href") {
                        tree.set_href(href)?;
                    }
                }
                Ok(Event::Text(e)) if in_toc && label_depth > 0 => {
                    let text = reader.decoder().decode(&e).unwrap_or_default();
                    tree.push_label(text.as_ref())?;
                }
                Ok(Event::GeneralRef(e)) if in_toc && label_depth > 0 => {
                    if let Some(ch) = resolve_entity(&reader, &e) {
                        tree.push_label_char(ch)?;
                    }
                }
                Ok(Event::End(e)) => match local_name(e.name().as_ref()).as_slice() {
                    b"a" | b"span" if in_toc => label_depth = label_depth.saturating_sub(1),
                    b"li" if in_toc => tree.close()?,
                    b"nav" if in_toc => done = true,
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(AnchorError::Navigation(format!(
                        "nav XML parse error: {:?}",
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(Self::new(tree.finish()))
    }

    /// Parse an EPUB 2.0 NCX document.
    pub fn parse_ncx(content: &[u8]) -> Result<Self, AnchorError> {
        Self::parse_ncx_with_limits(content, TocLimits::default())
    }

    pub fn parse_ncx_with_limits(content: &[u8], limits: TocLimits) -> Result<Self, AnchorError> {
        let mut reader = Reader::from_reader(content);
        reader.config_mut().trim_text(false);
        let mut buf = Vec::with_capacity(256);
        let mut tree = TreeBuilder::new(limits);
        let mut in_nav_map = false;
        let mut in_text = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match local_name(e.name().as_ref()).as_slice() {
                    b"navmap" => in_nav_map = true,
                    b"navpoint" if in_nav_map => tree.open()?,
                    b"text" if in_nav_map => in_text = true,
                    b"content" if in_nav_map => {
                        if let Some(src) = attribute(&reader, &e, b"src") {
                            tree.set_href(src)?;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) => {
                    if in_nav_map && local_name(e.name().as_ref()) == b"content" {
                        if let Some(src) = attribute(&reader, &e, b"src") {
                            tree.set_href(src)?;
                        }
                    }
                }
                Ok(Event::Text(e)) if in_text => {
                    let text = reader.decoder().decode(&e).unwrap_or_default();
                    tree.push_label(text.as_ref())?;
                }
                Ok(Event::GeneralRef(e)) if in_text => {
                    if let Some(ch) = resolve_entity(&reader, &e) {
                        tree.push_label_char(ch)?;
                    }
                }
                Ok(Event::End(e)) => match local_name(e.name().as_ref()).as_slice() {
                    b"text" => in_text = false,
                    b"navpoint" if in_nav_map => tree.close()?,
                    b"navmap" => in_nav_map = false,
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(AnchorError::Navigation(format!("NCX parse error: {:?}", e)))
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(Self::new(tree.finish()))
    }

    /// Total entry count, nested entries included.
    pub fn len(&self) -> usize {
        fn count(entries: &[TocEntry]) -> usize {
            entries.iter().map(|e| 1 + count(&e.children)).sum()
        }
        count(&self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in document order with their depth.
    pub fn flatten(&self) -> Vec<FlatTocEntry<'_>> {
        fn visit<'a>(entries: &'a [TocEntry], depth: usize, out: &mut Vec<FlatTocEntry<'a>>) {
            for entry in entries {
                out.push(FlatTocEntry {
                    depth,
                    label: &entry.label,
                    href: &entry.href,
                });
                visit(&entry.children, depth + 1, out);
            }
        }
        let mut out = Vec::with_capacity(self.len());
        visit(&self.entries, 0, &mut out);
        out
    }
}

struct PartialEntry {
    label: String,
    href: Option<String>,
    children: Vec<TocEntry>,
}

/// Stack-based tree assembly shared by both formats.
struct TreeBuilder {
    limits: TocLimits,
    stack: Vec<PartialEntry>,
    roots: Vec<TocEntry>,
    count: usize,
}

impl TreeBuilder {
    fn new(limits: TocLimits) -> Self {
        Self {
            limits,
            stack: Vec::with_capacity(8),
            roots: Vec::with_capacity(32),
            count: 0,
        }
    }

    fn open(&mut self) -> Result<(), AnchorError> {
        if self.stack.len() >= self.limits.max_depth {
            return Err(limit_error("max_depth", self.stack.len() + 1, self.limits.max_depth));
        }
        self.stack.push(PartialEntry {
            label: String::new(),
            href: None,
            children: Vec::new(),
        });
        Ok(())
    }

    fn set_href(&mut self, href: String) -> Result<(), AnchorError> {
        if href.len() > self.limits.max_href_bytes {
            return Err(limit_error("max_href_bytes", href.len(), self.limits.max_href_bytes));
        }
        if let Some(top) = self.stack.last_mut() {
            if top.href.is_none() {
                top.href = Some(href);
            }
        }
        Ok(())
    }

    fn push_label(&mut self, text: &str) -> Result<(), AnchorError> {
        let max = self.limits.max_label_bytes;
        let Some(top) = self.stack.last_mut() else {
            return Ok(());
        };
        // Formatted labels ("Part <em>One</em>") arrive as several text events.
        top.label.push_str(text);
        if top.label.len() > max {
            return Err(limit_error("max_label_bytes", top.label.len(), max));
        }
        Ok(())
    }

    fn push_label_char(&mut self, ch: char) -> Result<(), AnchorError> {
        let max = self.limits.max_label_bytes;
        if let Some(top) = self.stack.last_mut() {
            top.label.push(ch);
            if top.label.len() > max {
                return Err(limit_error("max_label_bytes", top.label.len(), max));
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), AnchorError> {
        let Some(partial) = self.stack.pop() else {
            return Ok(());
        };
        let siblings = match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        };
        match partial.href {
            Some(href) => {
                self.count += 1;
                if self.count > self.limits.max_entries {
                    return Err(limit_error("max_entries", self.count, self.limits.max_entries));
                }
                siblings.push(TocEntry {
                    label: collapse_whitespace(&partial.label),
                    href,
                    children: partial.children,
                });
            }
            // Heading-only entries keep their children at the heading's level.
            None => siblings.extend(partial.children),
        }
        Ok(())
    }

    fn finish(mut self) -> Vec<TocEntry> {
        while !self.stack.is_empty() {
            if self.close().is_err() {
                break;
            }
        }
        self.roots
    }
}

fn collapse_whitespace(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn limit_error(kind: &str, actual: usize, limit: usize) -> AnchorError {
    AnchorError::Navigation(format!(
        "TOC exceeds {} ({} > {})",
        kind, actual, limit
    ))
}
