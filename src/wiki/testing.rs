//! Testing utilities for building and asserting node trees
//!
//!     Hand-building trees through the `Element` API is verbose enough that
//!     test intent drowns in construction noise. These factories keep the
//!     fixtures compact, and `assert_tree` diffs the serde representation so
//!     a failing assertion shows the whole tree, not just the first mismatch.

use crate::wiki::ast::{Alignment, Element, ElementKind, Node, NumberingStyle};

pub fn text(value: impl Into<String>) -> Node {
    Node::Text(value.into())
}

pub fn element(kind: ElementKind, children: Vec<Node>) -> Node {
    let mut el = Element::new(kind);
    for child in children {
        el.push(child);
    }
    Node::Element(el)
}

pub fn fragment(children: Vec<Node>) -> Node {
    element(ElementKind::Fragment, children)
}

pub fn paragraph(children: Vec<Node>) -> Node {
    element(ElementKind::Paragraph, children)
}

pub fn header(level: u8, fragment: Option<&str>, children: Vec<Node>) -> Node {
    element(
        ElementKind::Header {
            level,
            fragment: fragment.map(str::to_string),
        },
        children,
    )
}

pub fn bold(children: Vec<Node>) -> Node {
    element(ElementKind::Bold, children)
}

pub fn italic(children: Vec<Node>) -> Node {
    element(ElementKind::Italic, children)
}

pub fn anchor(link: &str, label: &str) -> Node {
    element(
        ElementKind::Anchor {
            link: link.to_string(),
        },
        vec![text(label)],
    )
}

pub fn unordered_list(items: Vec<Node>) -> Node {
    element(
        ElementKind::List {
            ordered: false,
            style: NumberingStyle::Arabic,
            start: None,
        },
        items,
    )
}

pub fn ordered_list(style: NumberingStyle, start: Option<u32>, items: Vec<Node>) -> Node {
    element(
        ElementKind::List {
            ordered: true,
            style,
            start,
        },
        items,
    )
}

pub fn list_item(children: Vec<Node>) -> Node {
    element(ElementKind::ListItem, children)
}

pub fn table(rows: Vec<Node>) -> Node {
    element(ElementKind::Table, rows)
}

pub fn row(cells: Vec<Node>) -> Node {
    element(ElementKind::TableRow, cells)
}

pub fn cell(align: Alignment, children: Vec<Node>) -> Node {
    element(
        ElementKind::TableCell {
            header: false,
            colspan: 1,
            align,
        },
        children,
    )
}

pub fn header_cell(align: Alignment, children: Vec<Node>) -> Node {
    element(
        ElementKind::TableCell {
            header: true,
            colspan: 1,
            align,
        },
        children,
    )
}

pub fn blockquote(citation: bool, children: Vec<Node>) -> Node {
    element(ElementKind::Blockquote { citation }, children)
}

pub fn preformatted(content: &str) -> Node {
    element(ElementKind::Preformatted, vec![text(content)])
}

/// Asserts two trees are equal, printing both as JSON on mismatch so the
/// full shapes can be compared side by side.
pub fn assert_tree(actual: &Node, expected: &Node) {
    if actual != expected {
        let actual_json =
            serde_json::to_string_pretty(actual).unwrap_or_else(|_| format!("{actual:?}"));
        let expected_json =
            serde_json::to_string_pretty(expected).unwrap_or_else(|_| format!("{expected:?}"));
        panic!("tree mismatch\n--- expected ---\n{expected_json}\n--- actual ---\n{actual_json}");
    }
}
