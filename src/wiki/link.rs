//! Link target normalization
//!
//!     Short link syntaxes (`#12`, `{3}`, `[456]`, `r789`, `r1:2`) and bare
//!     labels all normalize to a canonical `scheme:target` form. The parser
//!     runs every link-shaped match through this module so the tree only ever
//!     carries canonical targets; the serializer's short-form detection is the
//!     inverse mapping.

use std::error::Error;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::wiki::grammar::{LOG_SYNTAX, WIKI_SYNTAX};

/// Error from [`normalize_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The raw input was empty or whitespace only.
    EmptyLabel,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::EmptyLabel => write!(f, "link label is empty"),
        }
    }
}

impl Error for LinkError {}

static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.+-]+:").expect("scheme prefix pattern"));

/// Converts the short syntactic forms to their canonical scheme. Anything
/// that is not a recognized short form passes through unchanged.
pub fn convert_wiki_syntax(link: &str) -> String {
    if !WIKI_SYNTAX.is_match(link) {
        return link.to_string();
    }
    match link.as_bytes()[0] {
        b'{' => format!("report:{}", &link[1..link.len() - 1]),
        b'[' => {
            let scheme = if LOG_SYNTAX.is_match(link) { "log:@" } else { "changeset:" };
            format!("{scheme}{}", &link[1..link.len() - 1])
        }
        b'#' => format!("ticket:{}", &link[1..]),
        b'r' => {
            let scheme = if LOG_SYNTAX.is_match(link) { "log:@" } else { "changeset:" };
            format!("{scheme}{}", &link[1..])
        }
        _ => link.to_string(),
    }
}

/// Normalizes a raw link target or label to canonical `scheme:target` form.
///
/// Short forms are converted to their scheme, path-like targets (leading `/`,
/// `.` or `#`) and already-schemed targets pass through, and everything else
/// becomes a `wiki:` page reference. A `wiki:` target containing whitespace
/// is quoted with whichever quote character it does not contain.
pub fn normalize_link(raw: &str) -> Result<String, LinkError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LinkError::EmptyLabel);
    }
    let mut link = convert_wiki_syntax(trimmed);
    if !link.starts_with(['/', '.', '#']) && !SCHEME_PREFIX.is_match(&link) {
        link = format!("wiki:{link}");
    }
    if let Some(target) = link.strip_prefix("wiki:") {
        if !target.starts_with(['"', '\'']) && target.contains(char::is_whitespace) {
            let quoted = if !target.contains('"') {
                format!("\"{target}\"")
            } else if !target.contains('\'') {
                format!("'{target}'")
            } else {
                format!("\"{}\"", target.replace('"', "%22"))
            };
            link = format!("wiki:{quoted}");
        }
    }
    Ok(link)
}

/// Renders a bracketed link with a label, choosing quoting so the label
/// survives the round trip: plain, then double-quoted, then single-quoted,
/// then double-quoted with the double quotes stripped.
pub fn bracket_link_text(link: &str, label: &str) -> String {
    if !label.contains(']') && !label.starts_with(['"', '\'']) {
        return format!("[{link} {label}]");
    }
    if !label.contains('"') {
        return format!("[{link} \"{label}\"]");
    }
    if !label.contains('\'') {
        return format!("[{link} '{label}']");
    }
    format!("[{link} \"{}\"]", label.replace('"', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("#12", "ticket:12")]
    #[case("{3}", "report:3")]
    #[case("[456]", "changeset:456")]
    #[case("[456/trunk]", "changeset:456/trunk")]
    #[case("r789", "changeset:789")]
    #[case("r1:2", "log:@1:2")]
    #[case("r1-2", "log:@1-2")]
    #[case("[1:2]", "log:@1:2")]
    #[case("[1:2/trunk]", "log:@1:2/trunk")]
    fn short_forms_convert(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_link(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("wiki:TracLinks", "wiki:TracLinks")]
    #[case("http://example.org/", "http://example.org/")]
    #[case("/relative/path", "/relative/path")]
    #[case("#section", "#section")]
    #[case("./sibling", "./sibling")]
    fn schemed_and_path_targets_pass_through(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_link(raw).unwrap(), expected);
    }

    #[test]
    fn bare_labels_become_wiki_targets() {
        assert_eq!(normalize_link("SandBox").unwrap(), "wiki:SandBox");
    }

    #[test]
    fn whitespace_targets_are_quoted() {
        assert_eq!(normalize_link("My Page").unwrap(), "wiki:\"My Page\"");
        assert_eq!(
            normalize_link("wiki:My \"odd\" Page").unwrap(),
            "wiki:'My \"odd\" Page'"
        );
        assert_eq!(
            normalize_link("A \"b\" 'c'").unwrap(),
            "wiki:\"A %22b%22 'c'\""
        );
        // Already-quoted targets stay as-is.
        assert_eq!(
            normalize_link("wiki:\"My Page\"").unwrap(),
            "wiki:\"My Page\""
        );
    }

    #[test]
    fn empty_labels_are_rejected() {
        assert_eq!(normalize_link(""), Err(LinkError::EmptyLabel));
        assert_eq!(normalize_link("   "), Err(LinkError::EmptyLabel));
    }

    #[rstest]
    #[case("wiki:Target", "plain label", "[wiki:Target plain label]")]
    #[case("wiki:Target", "has ] bracket", "[wiki:Target \"has ] bracket\"]")]
    #[case("wiki:Target", "has ] and \"", "[wiki:Target 'has ] and \"']")]
    #[case("wiki:Target", "' \" both ]", "[wiki:Target \"'  both ]\"]")]
    fn label_quoting_ladder(#[case] link: &str, #[case] label: &str, #[case] expected: &str) {
        assert_eq!(bracket_link_text(link, label), expected);
    }
}
