//! One-pass XHTML walk producing the flat text-node list of a content document.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use smallvec::SmallVec;

use super::page::TextNode;
use crate::error::AnchorError;
use crate::xml::{local_name, resolve_entity};

const SKIPPED: &[&[u8]] = &[b"head", b"script", b"style", b"title", b"template", b"noscript"];

const BLOCKS: &[&[u8]] = &[
    b"address", b"article", b"aside", b"blockquote", b"body", b"br", b"dd", b"div", b"dl", b"dt",
    b"figcaption", b"figure", b"footer", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"header", b"hr",
    b"li", b"main", b"nav", b"ol", b"p", b"pre", b"section", b"table", b"td", b"th", b"tr", b"ul",
];

struct Frame {
    name: Vec<u8>,
    /// Steps from the document element; empty for the document element itself.
    path: SmallVec<[u32; 8]>,
    element_children: u32,
    skipped: bool,
    in_body: bool,
}

struct PendingText {
    text: String,
    steps: SmallVec<[u32; 8]>,
    block: u32,
}

/// Extract the visible text nodes of an XHTML document in reading order.
///
/// Whitespace-only nodes are kept so offsets line up with the live DOM;
/// consumers decide whether to skip them. Each node records its CFI step path
/// (element steps are even, the text slot after the n-th child element is
/// `2n + 1`). Adjacent text and entity events merge into one node.
pub fn extract_text_nodes(xhtml: &[u8]) -> Result<Vec<TextNode>, AnchorError> {
    let mut reader = Reader::from_reader(xhtml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Frame> = Vec::with_capacity(16);
    let mut nodes = Vec::new();
    let mut pending: Option<PendingText> = None;
    let mut block: u32 = 0;
    let mut buf = Vec::with_capacity(512);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                flush(&mut pending, &mut nodes);
                let name = local_name(start.name().as_ref());
                if BLOCKS.contains(&name.as_slice()) {
                    block += 1;
                }
                let frame = open_child(&mut stack, name);
                stack.push(frame);
            }
            Ok(Event::Empty(start)) => {
                flush(&mut pending, &mut nodes);
                let name = local_name(start.name().as_ref());
                if BLOCKS.contains(&name.as_slice()) {
                    block += 1;
                }
                let _ = open_child(&mut stack, name);
            }
            Ok(Event::End(end)) => {
                flush(&mut pending, &mut nodes);
                let name = local_name(end.name().as_ref());
                if BLOCKS.contains(&name.as_slice()) {
                    block += 1;
                }
                if let Some(pos) = stack.iter().rposition(|frame| frame.name == name) {
                    stack.truncate(pos);
                }
            }
            Ok(Event::Text(text)) => {
                let decoded = reader
                    .decoder()
                    .decode(&text)
                    .map_err(|err| AnchorError::Xhtml(err.to_string()))?;
                append_text(&mut pending, &stack, block, &decoded);
            }
            Ok(Event::CData(data)) => {
                let decoded = reader
                    .decoder()
                    .decode(&data)
                    .map_err(|err| AnchorError::Xhtml(err.to_string()))?;
                append_text(&mut pending, &stack, block, &decoded);
            }
            Ok(Event::GeneralRef(entity)) => {
                if let Some(ch) = resolve_entity(&reader, &entity) {
                    let mut utf8 = [0u8; 4];
                    append_text(&mut pending, &stack, block, ch.encode_utf8(&mut utf8));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(AnchorError::Xhtml(format!(
                    "{} at byte {}",
                    err,
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }
    flush(&mut pending, &mut nodes);
    Ok(nodes)
}

fn open_child(stack: &mut [Frame], name: Vec<u8>) -> Frame {
    let is_body = name.as_slice() == b"body";
    let is_skipped = SKIPPED.contains(&name.as_slice());
    match stack.last_mut() {
        Some(parent) => {
            parent.element_children += 1;
            let mut path = parent.path.clone();
            path.push(parent.element_children * 2);
            Frame {
                skipped: parent.skipped || is_skipped,
                in_body: parent.in_body || is_body,
                name,
                path,
                element_children: 0,
            }
        }
        None => Frame {
            skipped: is_skipped,
            in_body: is_body,
            name,
            path: SmallVec::new(),
            element_children: 0,
        },
    }
}

fn append_text(pending: &mut Option<PendingText>, stack: &[Frame], block: u32, text: &str) {
    let Some(parent) = stack.last() else {
        return;
    };
    if parent.skipped || !parent.in_body {
        return;
    }
    match pending {
        Some(open) => open.text.push_str(text),
        None => {
            let mut steps = parent.path.clone();
            steps.push(parent.element_children * 2 + 1);
            *pending = Some(PendingText {
                text: text.to_string(),
                steps,
                block,
            });
        }
    }
}

fn flush(pending: &mut Option<PendingText>, nodes: &mut Vec<TextNode>) {
    if let Some(open) = pending.take() {
        if !open.text.is_empty() {
            nodes.push(TextNode {
                text: open.text,
                block: open.block,
                steps: open.steps,
            });
        }
    }
}
