//! EPUB Canonical Fragment Identifier parsing and ordering.
//!
//! Renderers treat CFIs as opaque strings, but the location index has to place
//! an arbitrary renderer-reported CFI between its own break points. That needs
//! the document-order comparison from EPUB CFI 1.1: compare the
//! step indices component by component, then the terminal character offset.
//!
//! Only the parts that affect ordering are modelled. ID assertions are kept for
//! round-tripping; spatial (`@`) and temporal (`~`) suffixes are dropped.
//! Range CFIs (`epubcfi(parent,start,end)`) resolve to their start point.

use core::cmp::Ordering;
use core::fmt;

use smallvec::SmallVec;

/// CFI parse failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CfiError {
    /// Input was empty or only the `epubcfi()` wrapper.
    Empty,
    /// Input did not follow the CFI grammar.
    Syntax {
        /// Byte offset into the input where parsing stopped.
        position: usize,
        /// What the parser expected.
        message: &'static str,
    },
}

impl fmt::Display for CfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty cfi"),
            Self::Syntax { position, message } => {
                write!(f, "invalid cfi at byte {}: {}", position, message)
            }
        }
    }
}

impl std::error::Error for CfiError {}

/// One `/N[id]` step of a CFI path.
#[derive(Clone, Debug)]
pub struct CfiStep {
    /// Child index. Even for elements, odd for text/character data.
    pub index: u32,
    /// Step follows a `!` indirection into a content document.
    pub indirect: bool,
    /// Optional ID assertion.
    pub id: Option<Box<str>>,
}

/// Parsed point CFI with a total document order.
#[derive(Clone, Debug)]
pub struct Cfi {
    steps: SmallVec<[CfiStep; 12]>,
    offset: Option<u32>,
}

impl Cfi {
    /// Parse a CFI with or without the `epubcfi(...)` wrapper.
    pub fn parse(input: &str) -> Result<Self, CfiError> {
        let trimmed = input.trim();
        let (inner, base_offset) = match trimmed
            .strip_prefix("epubcfi(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (inner, "epubcfi(".len()),
            None => (trimmed, 0),
        };
        if inner.is_empty() {
            return Err(CfiError::Empty);
        }

        let parts = split_top_level_commas(inner);
        match parts.as_slice() {
            [single] => parse_point(single, base_offset),
            [parent, start, _end] => {
                let mut cfi = parse_point(parent, base_offset)?;
                if cfi.offset.is_some() {
                    return Err(CfiError::Syntax {
                        position: base_offset + parent.len(),
                        message: "range parent must not carry an offset",
                    });
                }
                let local = parse_point(start, base_offset + parent.len() + 1)?;
                cfi.steps.extend(local.steps);
                cfi.offset = local.offset;
                Ok(cfi)
            }
            _ => Err(CfiError::Syntax {
                position: base_offset,
                message: "expected a point or a three-part range",
            }),
        }
    }

    /// Build a point inside a content document from a package-level base
    /// (`/6/4[chap01]`) plus local element steps and a character offset.
    pub fn in_document(base: &Cfi, local_steps: &[u32], offset: u32) -> Self {
        let mut steps = base.steps.clone();
        for (idx, step) in local_steps.iter().enumerate() {
            steps.push(CfiStep {
                index: *step,
                indirect: idx == 0,
                id: None,
            });
        }
        Self {
            steps,
            offset: Some(offset),
        }
    }

    /// Path steps in order.
    pub fn steps(&self) -> &[CfiStep] {
        &self.steps
    }

    /// Terminal character offset, if any.
    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    /// Index of the spine itemref step (the step right before the first
    /// indirection), when present.
    pub fn spine_step(&self) -> Option<u32> {
        let first_indirect = self.steps.iter().position(|step| step.indirect)?;
        first_indirect
            .checked_sub(1)
            .map(|idx| self.steps[idx].index)
    }

    fn order_key(&self) -> impl Iterator<Item = u32> + '_ {
        self.steps.iter().map(|step| step.index)
    }
}

impl PartialEq for Cfi {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cfi {}

impl PartialOrd for Cfi {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cfi {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.order_key().cmp(other.order_key()) {
            Ordering::Equal => self.offset.unwrap_or(0).cmp(&other.offset.unwrap_or(0)),
            ord => ord,
        }
    }
}

impl fmt::Display for Cfi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("epubcfi(")?;
        for step in &self.steps {
            if step.indirect {
                f.write_str("!")?;
            }
            write!(f, "/{}", step.index)?;
            if let Some(id) = step.id.as_deref() {
                f.write_str("[")?;
                for ch in id.chars() {
                    if matches!(ch, '[' | ']' | '^' | ',' | '(' | ')' | ';' | '=') {
                        f.write_str("^")?;
                    }
                    write!(f, "{}", ch)?;
                }
                f.write_str("]")?;
            }
        }
        if let Some(offset) = self.offset {
            write!(f, ":{}", offset)?;
        }
        f.write_str(")")
    }
}

impl core::str::FromStr for Cfi {
    type Err = CfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_top_level_commas(input: &str) -> SmallVec<[&str; 3]> {
    let mut parts = SmallVec::new();
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut escaped = false;
    let mut start = 0usize;
    for (idx, byte) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'^' => escaped = true,
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_point(input: &str, base: usize) -> Result<Cfi, CfiError> {
    let bytes = input.as_bytes();
    let mut pos = 0usize;
    let mut steps: SmallVec<[CfiStep; 12]> = SmallVec::new();
    let mut offset = None;
    let mut pending_indirect = false;

    while pos < bytes.len() {
        match bytes[pos] {
            b'!' => {
                if pending_indirect {
                    return Err(syntax(base + pos, "repeated indirection"));
                }
                pending_indirect = true;
                pos += 1;
            }
            b'/' => {
                pos += 1;
                let index = read_integer(bytes, &mut pos)
                    .ok_or_else(|| syntax(base + pos, "expected step index"))?;
                let id = read_assertion(input, &mut pos, base)?;
                steps.push(CfiStep {
                    index,
                    indirect: pending_indirect,
                    id,
                });
                pending_indirect = false;
            }
            b':' => {
                pos += 1;
                let value = read_integer(bytes, &mut pos)
                    .ok_or_else(|| syntax(base + pos, "expected character offset"))?;
                offset = Some(value);
                // Text location assertion is informational only.
                let _ = read_assertion(input, &mut pos, base)?;
                break;
            }
            b'~' | b'@' => break,
            _ => return Err(syntax(base + pos, "unexpected character")),
        }
    }

    if pending_indirect {
        return Err(syntax(base + pos, "indirection without a step"));
    }
    if steps.is_empty() && offset.is_none() {
        return Err(CfiError::Empty);
    }
    Ok(Cfi { steps, offset })
}

fn read_integer(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let start = *pos;
    let mut value = 0u32;
    while let Some(byte) = bytes.get(*pos).filter(|b| b.is_ascii_digit()) {
        value = value.checked_mul(10)?.checked_add(u32::from(byte - b'0'))?;
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    Some(value)
}

fn read_assertion(input: &str, pos: &mut usize, base: usize) -> Result<Option<Box<str>>, CfiError> {
    let bytes = input.as_bytes();
    if bytes.get(*pos) != Some(&b'[') {
        return Ok(None);
    }
    let open = *pos;
    *pos += 1;
    let mut value = String::new();
    let mut escaped = false;
    for (rel, ch) in input[*pos..].char_indices() {
        if escaped {
            value.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '^' => escaped = true,
            ']' => {
                *pos += rel + 1;
                // Parameters after ';' (e.g. side bias) don't identify anything.
                let id = value.split(';').next().unwrap_or_default().trim();
                if id.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(id.into()));
            }
            _ => value.push(ch),
        }
    }
    Err(syntax(base + open, "unterminated assertion"))
}

fn syntax(position: usize, message: &'static str) -> CfiError {
    CfiError::Syntax { position, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfi(s: &str) -> Cfi {
        Cfi::parse(s).unwrap()
    }

    #[test]
    fn parses_wrapped_point_with_assertions() {
        let parsed = cfi("epubcfi(/6/4[chap01ref]!/4[body01]/10[para05]/3:10)");
        let indices: Vec<u32> = parsed.steps().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![6, 4, 4, 10, 3]);
        assert_eq!(parsed.offset(), Some(10));
        assert!(parsed.steps()[2].indirect);
        assert_eq!(parsed.steps()[1].id.as_deref(), Some("chap01ref"));
        assert_eq!(parsed.spine_step(), Some(4));
    }

    #[test]
    fn parses_bare_path_and_spatial_suffix() {
        let parsed = cfi("/6/2!/4/1:0~23.5@10:20");
        assert_eq!(parsed.offset(), Some(0));
        assert_eq!(parsed.steps().len(), 4);
    }

    #[test]
    fn range_resolves_to_start_point() {
        let range = cfi("epubcfi(/6/4!/4/10,/2/1:3,/2/1:9)");
        assert_eq!(range, cfi("epubcfi(/6/4!/4/10/2/1:3)"));
    }

    #[test]
    fn ordering_follows_document_order() {
        let a = cfi("epubcfi(/6/4!/4/2/1:0)");
        let b = cfi("epubcfi(/6/4!/4/2/1:15)");
        let c = cfi("epubcfi(/6/4!/4/10/1:0)");
        let d = cfi("epubcfi(/6/6!/4/2/1:0)");
        assert!(a < b);
        assert!(b < c, "step 10 sorts after step 2 numerically");
        assert!(c < d);
        assert!(cfi("epubcfi(/6/4!/4/2)") < a, "ancestor sorts before descendant");
    }

    #[test]
    fn equality_ignores_assertions() {
        assert_eq!(
            cfi("epubcfi(/6/4[a]!/4/2/1:5)"),
            cfi("epubcfi(/6/4!/4/2/1:5)")
        );
    }

    #[test]
    fn escaped_brackets_in_assertion() {
        let parsed = cfi("epubcfi(/6/4[id^]x]!/4:0)");
        assert_eq!(parsed.steps()[1].id.as_deref(), Some("id]x"));
        let shown = parsed.to_string();
        assert!(shown.contains("[id^]x]"), "{shown}");
    }

    #[test]
    fn display_roundtrips_structure() {
        let original = cfi("epubcfi(/6/14[ch3]!/4/2/1:120)");
        let again = cfi(&original.to_string());
        assert_eq!(original, again);
        assert_eq!(again.offset(), Some(120));
    }

    #[test]
    fn in_document_marks_indirection() {
        let base = cfi("/6/8[c3]");
        let point = Cfi::in_document(&base, &[4, 2, 1], 40);
        assert_eq!(point.to_string(), "epubcfi(/6/8[c3]!/4/2/1:40)");
        assert_eq!(point.spine_step(), Some(8));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Cfi::parse("epubcfi()"), Err(CfiError::Empty));
        assert!(matches!(Cfi::parse("/6/x"), Err(CfiError::Syntax { .. })));
        assert!(matches!(Cfi::parse("/6/4[open"), Err(CfiError::Syntax { .. })));
        assert!(matches!(Cfi::parse("/6/4!"), Err(CfiError::Syntax { .. })));
        assert!(matches!(Cfi::parse("hello"), Err(CfiError::Syntax { .. })));
    }
}
