//! Bidirectional Trac wikitext conversion
//!
//!     Two total, inverse-shaped passes over one intermediate tree:
//!     [`parsing::wikitext_to_tree`] turns wikitext into a [`ast::Node`] tree
//!     and never fails, while [`serializing::tree_to_wikitext`] renders a tree
//!     back to wikitext and fails only on structurally invalid input trees.
//!     [`link::normalize_link`] is the shared link-target canonicalizer.

pub mod ast;
pub mod grammar;
pub mod link;
pub mod parsing;
pub mod serializing;
pub mod testing;

/// Conversion options shared by both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Treat every newline inside a paragraph as a hard line break instead of
    /// joining continuation lines with a space.
    pub escape_newlines: bool,
    /// Emit text verbatim, without escape protection; line breaks become
    /// newlines with block-appropriate indentation instead of `[[BR]]`.
    pub format_code_block: bool,
}

pub use ast::{Alignment, Element, ElementKind, Node, NumberingStyle};
pub use link::{normalize_link, LinkError};
pub use parsing::wikitext_to_tree;
pub use serializing::{tree_to_wikitext, SerializeError};
