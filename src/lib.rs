//! # tracwiki
//!
//! A bidirectional converter between Trac wikitext and a typed node tree.
//!
//! Parsing is total: any input string produces a tree, with unrecognized
//! syntax degrading to literal text. Serialization walks a tree back to
//! wikitext, re-deriving nesting depth from tree shape and escaping text so
//! the output re-parses to the same tree.
//!
//! ```rust,ignore
//! use tracwiki::{wikitext_to_tree, tree_to_wikitext, Options};
//!
//! let options = Options::default();
//! let tree = wikitext_to_tree("'''bold''' text", &options);
//! let wikitext = tree_to_wikitext(&tree, &options)?;
//! assert_eq!(wikitext, "'''bold''' text");
//! ```

pub mod wiki;

pub use wiki::{
    normalize_link, tree_to_wikitext, wikitext_to_tree, Alignment, Element, ElementKind,
    LinkError, Node, NumberingStyle, Options, SerializeError,
};
