//! Small helpers shared by the quick-xml walkers.

use quick_xml::events::{BytesRef, BytesStart};
use quick_xml::reader::Reader;

/// Resolve a general entity reference (`&amp;`, `&#8212;`, `&nbsp;`) to text.
///
/// XHTML content documents routinely use HTML entity names that are not
/// predefined in XML; the common typographic ones are resolved here, unknown
/// names are dropped.
pub(crate) fn resolve_entity<R>(reader: &Reader<R>, entity: &BytesRef<'_>) -> Option<char> {
    let name = reader.decoder().decode(entity).ok()?;
    let name = name.as_ref();
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix('x').or_else(|| numeric.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "shy" => '\u{00AD}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "laquo" => '\u{00AB}',
        "raquo" => '\u{00BB}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "bdquo" => '\u{201E}',
        "thinsp" => '\u{2009}',
        _ => return None,
    };
    Some(ch)
}

/// Decode attribute `name` (exact or namespaced suffix match) from a start tag.
pub(crate) fn attribute<R>(
    reader: &Reader<R>,
    start: &BytesStart<'_>,
    name: &[u8],
) -> Option<String> {
    for attr in start.attributes().flatten() {
        let key = attr.key.as_ref();
        let matches = key == name
            || (key.len() > name.len()
                && key.ends_with(name)
                && key[key.len() - name.len() - 1] == b':');
        if matches {
            let value = reader.decoder().decode(attr.value.as_ref()).ok()?;
            return Some(unescape_basic(value.as_ref()));
        }
    }
    None
}

/// Local element name without any namespace prefix, lowercased.
pub(crate) fn local_name(raw: &[u8]) -> Vec<u8> {
    let local = match raw.iter().rposition(|b| *b == b':') {
        Some(idx) => &raw[idx + 1..],
        None => raw,
    };
    local.to_ascii_lowercase()
}

fn unescape_basic(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_name_strips_prefix_and_case() {
        assert_eq!(local_name(b"xhtml:P"), b"p".to_vec());
        assert_eq!(local_name(b"navPoint"), b"navpoint".to_vec());
    }

    #[test]
    fn attribute_matches_namespaced_suffix() {
        let reader = Reader::from_reader(&b""[..]);
        let start = BytesStart::from_content(r#"nav epub:type="toc" href="a&amp;b.xhtml""#, 3);
        assert_eq!(attribute(&reader, &start, b"type").as_deref(), Some("toc"));
        assert_eq!(attribute(&reader, &start, b"href").as_deref(), Some("a&b.xhtml"));
        assert_eq!(attribute(&reader, &start, b"id"), None);
    }
}
