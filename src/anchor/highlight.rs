//! Turn matches into per-node wrap instructions for a DOM adapter.

use std::ops::Range;

use super::page::TextNode;
use super::AnchorMatch;
use crate::description::{ChapterBundle, DescriptionKind};

/// Wrap `range` of text node `node` in a highlight element.
///
/// A match spanning several text nodes yields one slice per node; `is_first`
/// and `is_last` mark the ends so an adapter can round corners or attach a
/// click target once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HighlightSlice {
    pub description_id: String,
    pub kind: DescriptionKind,
    pub node: usize,
    /// UTF-8 byte range into the node text.
    pub range: Range<usize>,
    /// Same range in UTF-16 code units, as DOM `Range` offsets expect.
    pub utf16_range: Range<usize>,
    pub is_first: bool,
    pub is_last: bool,
    pub image_url: Option<String>,
}

/// Slices for every match, ordered back-to-front (last node first, and within
/// a node the later range first) so applying them in order never shifts the
/// offsets of slices not yet applied.
pub fn plan_highlights(
    matches: &[AnchorMatch],
    nodes: &[TextNode],
    bundle: Option<&ChapterBundle>,
) -> Vec<HighlightSlice> {
    let mut slices = Vec::new();
    for found in matches {
        if found.end <= found.start {
            continue;
        }
        let image_url = bundle
            .and_then(|b| b.image_for(&found.description_id))
            .map(|image| image.url.clone());
        let first_slice = slices.len();
        for node_idx in found.start.node..=found.end.node {
            let Some(node) = nodes.get(node_idx) else {
                break;
            };
            let start = if node_idx == found.start.node {
                found.start.offset
            } else {
                0
            };
            let end = if node_idx == found.end.node {
                found.end.offset
            } else {
                node.text.len()
            };
            let Some(text) = node.text.get(start..end) else {
                log::warn!(
                    "highlight range {}..{} is not on a char boundary of node {}",
                    start,
                    end,
                    node_idx
                );
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            let utf16_start = node.text[..start].encode_utf16().count();
            let utf16_end = utf16_start + text.encode_utf16().count();
            slices.push(HighlightSlice {
                description_id: found.description_id.clone(),
                kind: found.kind,
                node: node_idx,
                range: start..end,
                utf16_range: utf16_start..utf16_end,
                is_first: false,
                is_last: false,
                image_url: image_url.clone(),
            });
        }
        if let Some(first) = slices.get_mut(first_slice) {
            first.is_first = true;
        }
        if slices.len() > first_slice {
            if let Some(last) = slices.last_mut() {
                last.is_last = true;
            }
        }
    }
    slices.sort_by(|a, b| {
        b.node
            .cmp(&a.node)
            .then_with(|| b.range.start.cmp(&a.range.start))
    });
    slices
}
