mod common;

use common::fixtures::SyntheticBook;
use epub_anchor::{
    plan_highlights, ChapterBundle, ContentAnchor, Description, DescriptionKind, GeneratedImage,
    MatchStrategy, TextNode,
};

fn page(book: &SyntheticBook, section: usize, paragraphs: std::ops::Range<usize>) -> Vec<TextNode> {
    let nodes = book.section_nodes(section);
    nodes[paragraphs].to_vec()
}

fn span_text(nodes: &[TextNode], node: usize, range: std::ops::Range<usize>) -> &str {
    &nodes[node].text[range]
}

/// Byte offset of the first word starting at or after `from`.
fn word_start(text: &str, from: usize) -> usize {
    from + text[from..].find(' ').map_or(0, |idx| idx + 1)
}

#[test]
fn verbatim_text_matches_by_prefix_or_full() {
    let book = SyntheticBook::standard();
    let nodes = page(&book, 2, 8..13);
    let long_source = book.paragraph(2, 10);
    let short_source = book.paragraph(2, 12);
    let short_at = word_start(&short_source, 100);

    let long = Description::new("long", DescriptionKind::Location, &long_source[..300]);
    let short = Description::new(
        "short",
        DescriptionKind::Object,
        &short_source[short_at..short_at + 100],
    );
    let mut anchor = ContentAnchor::default();
    let found = anchor.anchor(&[long, short], &nodes);
    assert_eq!(found.len(), 2);
    for found in &found {
        assert!(
            matches!(found.strategy, MatchStrategy::Prefix | MatchStrategy::Full),
            "{} matched via {:?}",
            found.description_id,
            found.strategy
        );
    }
    assert_eq!((found[0].start.node, found[0].start.offset), (2, 0));
    assert_eq!((found[1].start.node, found[1].start.offset), (4, short_at));
}

#[test]
fn duplicated_russian_chapter_header_is_stripped() {
    let book = SyntheticBook::standard();
    let nodes = page(&book, 3, 20..25);
    let source = book.paragraph(3, 22);
    let text = format!("Глава 4 Нити {}", &source[..240]);
    let description = Description::new("hdr", DescriptionKind::Atmosphere, text);

    let mut anchor = ContentAnchor::default();
    let found = anchor.anchor(&[description], &nodes);
    assert_eq!(found.len(), 1);
    let found = &found[0];
    assert!(
        matches!(found.strategy, MatchStrategy::Prefix | MatchStrategy::SkippedPrefix),
        "matched via {:?}",
        found.strategy
    );
    assert_eq!(found.start.node, 2);
    assert!(found.start.offset <= 20);
    assert!(found.end.node > 2 || found.end.offset >= 200);
}

#[test]
fn near_duplicates_are_split_by_their_tails() {
    let opener = "The ferry horn sounded twice across the marsh before dawn, and";
    let tail_a = " the keeper lit the copper lantern on the northern pier.";
    let tail_b = " the children ran down the willow lane toward the chapel bell.";
    let nodes = vec![
        TextNode::new(format!("{}{}", opener, tail_a), 0),
        TextNode::new("Nothing else happened for a while.", 1),
        TextNode::new(format!("{}{}", opener, tail_b), 2),
    ];
    let descriptions = [
        Description::new("b", DescriptionKind::Action, format!("{}{}", opener, tail_b)),
        Description::new("a", DescriptionKind::Action, format!("{}{}", opener, tail_a)),
    ];

    let mut anchor = ContentAnchor::default();
    let first = anchor.anchor(&descriptions, &nodes);
    assert_eq!(first.len(), 2);
    let b = first.iter().find(|m| m.description_id == "b").unwrap();
    let a = first.iter().find(|m| m.description_id == "a").unwrap();
    assert_eq!(b.start.node, 2);
    assert_eq!(a.start.node, 0);
    assert!(a.end <= b.start || b.end <= a.start, "spans overlap");

    // Same inputs, same answer.
    let second = anchor.anchor(&descriptions, &nodes);
    assert_eq!(first, second);
}

#[test]
fn unmatched_descriptions_are_skipped_quietly() {
    let book = SyntheticBook::standard();
    let nodes = page(&book, 0, 0..3);
    let descriptions = [
        Description::new(
            "gone",
            DescriptionKind::Other,
            "Nothing like this sentence is anywhere in the book at all.",
        ),
        Description::new("tiny", DescriptionKind::Other, "ok"),
        Description::new("blank", DescriptionKind::Other, "   "),
    ];
    let mut anchor = ContentAnchor::default();
    assert!(anchor.anchor(&descriptions, &nodes).is_empty());
    assert!(anchor.anchor(&descriptions, &[]).is_empty());
}

#[test]
fn span_across_paragraphs_yields_ordered_slices_with_image() {
    let book = SyntheticBook::standard();
    let nodes = page(&book, 1, 30..34);
    let tail = book.paragraph(1, 31);
    let head = book.paragraph(1, 32);
    let cut = word_start(&tail, tail.len() - 120);
    let text = format!("{} {}", &tail[cut..], &head[..160]);
    let description = Description::new("cross", DescriptionKind::Location, text);
    let bundle = ChapterBundle::new(2, vec![description]).with_image(GeneratedImage {
        description_id: "cross".into(),
        url: "https://images.example/cross.png".into(),
    });

    let mut anchor = ContentAnchor::default();
    let found = anchor.anchor(&bundle.descriptions, &nodes);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].start.node, 1);
    assert!(found[0].end.node >= 2);

    let slices = plan_highlights(&found, &nodes, Some(&bundle));
    assert!(slices.len() >= 2);
    assert!(slices.windows(2).all(|w| w[0].node > w[1].node));
    assert_eq!(slices.iter().filter(|s| s.is_first).count(), 1);
    assert_eq!(slices.iter().filter(|s| s.is_last).count(), 1);
    let first = slices.iter().find(|s| s.is_first).unwrap();
    assert_eq!(first.node, 1);
    assert_eq!(span_text(&nodes, first.node, first.range.clone()), &tail[cut..]);
    assert!(slices
        .iter()
        .all(|s| s.image_url.as_deref() == Some("https://images.example/cross.png")));
}
