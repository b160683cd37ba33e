//! Node tree shared by the parser and the serializer
//!
//!     The converter's intermediate representation is a plain tree of owned
//!     nodes. It is deliberately host independent: no parent pointers, no
//!     live-document coupling, just a sum type with owned child vectors. The
//!     parser builds a fresh tree on every call and the serializer walks one
//!     without mutating it, so both directions stay safe to call from any
//!     thread as long as each call owns its inputs.
//!
//!     Element kinds form a closed set and carry their attributes inline, so
//!     both traversals get compile-time coverage checking from `match` instead
//!     of dispatching on tag-name strings.

use serde::Serialize;

/// A node in the converter's intermediate tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Node {
    /// An immutable text run. Escaping state is derived from ancestry, never
    /// stored on the node.
    Text(String),
    Element(Element),
}

/// An element node: a kind plus an ordered sequence of owned children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Element {
    pub kind: ElementKind,
    pub children: Vec<Node>,
}

/// Numbering style of an ordered list, derived from the marker character
/// class during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberingStyle {
    Arabic,
    ArabicZero,
    LowerAlpha,
    UpperAlpha,
    LowerRoman,
    UpperRoman,
}

/// Horizontal alignment of a table cell, derived from the padding asymmetry
/// of the cell segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alignment {
    Left,
    Center,
    Right,
    Default,
}

/// The closed set of element kinds with their attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ElementKind {
    /// Root of a parsed document or of an inline-only fragment.
    Fragment,
    Paragraph,
    /// `level` is 1..=6; `fragment` is a validated anchor name, if present.
    Header {
        level: u8,
        fragment: Option<String>,
    },
    Bold,
    Italic,
    Underline,
    Strike,
    Subscript,
    Superscript,
    /// Inline monospace span (`tt`). Children are a single text run.
    Code,
    /// A link. The visible label is the element's text content; `link` is the
    /// canonical `scheme:target` form.
    Anchor {
        link: String,
    },
    List {
        ordered: bool,
        style: NumberingStyle,
        start: Option<u32>,
    },
    ListItem,
    DefinitionList,
    DefinitionTerm,
    DefinitionDescription,
    /// Citation (`>`) and indentation quotes share one kind; the flag records
    /// which syntax produced it and which prefix to re-emit.
    Blockquote {
        citation: bool,
    },
    Table,
    TableRow,
    TableCell {
        header: bool,
        colspan: u32,
        align: Alignment,
    },
    /// Fenced code block. Children are a single raw text run.
    Preformatted,
    HorizontalRule,
    LineBreak,
    /// Named fragment target, `[=#name label]`.
    AnchorSpan {
        id: String,
    },
}

impl ElementKind {
    /// Inline kinds flow inside a line; everything else is block structure.
    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            ElementKind::Bold
                | ElementKind::Italic
                | ElementKind::Underline
                | ElementKind::Strike
                | ElementKind::Subscript
                | ElementKind::Superscript
                | ElementKind::Code
                | ElementKind::Anchor { .. }
                | ElementKind::LineBreak
                | ElementKind::AnchorSpan { .. }
        )
    }

    /// Inline formatting kinds that participate in decoration tracking.
    pub fn is_decoration(&self) -> bool {
        matches!(
            self,
            ElementKind::Bold
                | ElementKind::Italic
                | ElementKind::Underline
                | ElementKind::Strike
                | ElementKind::Subscript
                | ElementKind::Superscript
        )
    }
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Element {
            kind,
            children: Vec::new(),
        }
    }

    /// Appends a child, merging adjacent text runs.
    pub fn push(&mut self, node: Node) {
        if let Node::Text(text) = &node {
            if text.is_empty() {
                return;
            }
            if let Some(Node::Text(existing)) = self.children.last_mut() {
                existing.push_str(text);
                return;
            }
        }
        self.children.push(node);
    }

    /// Concatenated text of all descendant text runs.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// True when any descendant element matches the predicate.
    pub fn has_descendant(&self, pred: &dyn Fn(&ElementKind) -> bool) -> bool {
        self.children.iter().any(|child| match child {
            Node::Element(el) => pred(&el.kind) || el.has_descendant(pred),
            Node::Text(_) => false,
        })
    }
}

fn collect_text(children: &[Node], out: &mut String) {
    for child in children {
        match child {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => collect_text(&el.children, out),
        }
    }
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text(value.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        match self {
            Node::Text(_) => true,
            Node::Element(el) => el.kind.is_inline(),
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            Node::Text(text) => text.clone(),
            Node::Element(el) => el.text_content(),
        }
    }
}
