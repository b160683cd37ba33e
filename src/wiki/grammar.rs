//! Grammar rule definitions
//!
//!     This module defines the complete set of recognized wikitext constructs
//!     as ordered regex alternatives. Order matters: the combined pattern is
//!     matched leftmost-first, so earlier alternatives take priority on ties,
//!     which is what disambiguates `'''''` from `'''` and a closing table row
//!     from a plain cell separator.
//!
//!     Every rule has a stable identity ([`Rule`]) used by both conversion
//!     directions to dispatch to a handler. The parser consumes the full line
//!     rule set (inline constructs plus block context); the serializer uses
//!     the inline subset as its escape-protection pattern.
//!
//!     Two lookaheads of the original grammar cannot be expressed in the
//!     `regex` crate. The log-revision alternative is ordered before the
//!     changeset-revision alternative instead of the `r<id>\b(?!:<id>)`
//!     negative lookahead, and the trailing boundary of a bare wiki page name
//!     is validated by [`wiki_page_name_boundary_ok`] after the match.
//!
//!     All compiled patterns are immutable statics; match position state lives
//!     in the per-call [`RuleScanner`], so concurrent conversions never share
//!     mutable matcher state.

use once_cell::sync::Lazy;
use regex::Regex;

/// Horizontal whitespace, as a character-class body.
const WS: &str = r" \t\r\x0C\x0B";

/// URI scheme of a canonical link target.
pub const LINK_SCHEME: &str = "[a-zA-Z][a-zA-Z0-9+.-]*";

/// Single- or double-quoted string, used by quoted link targets and labels.
pub const QUOTED_STRING: &str = r#"'[^']+'|"[^"]+""#;

/// Changeset identifier: a revision number or an abbreviated hash.
pub const CHANGESET_ID: &str = r"(?:\d+|[a-fA-F\d]{6,})";

const CHANGESET_PATH: &str = r"/[^\]]*";

/// Anchor/fragment name grammar (an approximation of XML `Name`).
pub const XML_NAME: &str = r"[:_\p{L}][-.:_\x{B7}\p{L}\p{Nd}]*";

fn wiki_page_name() -> String {
    format!(r"(?:\p{{Lu}}\p{{Ll}}+/?){{2,}}(?:@[0-9]+)?(?:\#{XML_NAME})?")
}

fn trac_link() -> String {
    // The original allows a single `|` inside a target when followed by a
    // non-delimiter; without lookahead the pipe consumes its follower.
    format!(
        r"{LINK_SCHEME}:(?:{QUOTED_STRING}|[a-zA-Z0-9/?!#@](?:(?:[^|<>{WS}]|\|[^|<>{WS}])*[a-zA-Z0-9/=])?)"
    )
}

/// Identity of a grammar rule. Variant order is the match priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    BoldItalic,
    Bold,
    Italic,
    Underline,
    Strike,
    Subscript,
    Superscript,
    BraceCode,
    BacktickCode,
    Ticket,
    Report,
    Log,
    Changeset,
    TracLink,
    BracketLink,
    Macro,
    WikiPageName,
    QuotedLink,
    AngleLink,
    NamedAnchor,
    EscapedPipes,
    Citation,
    Header,
    ListItem,
    Definition,
    Indent,
    RowClose,
    Cell,
}

impl Rule {
    /// Inline rules participate in paragraph opening and escape protection;
    /// block rules drive structural context.
    pub fn is_inline(self) -> bool {
        !matches!(
            self,
            Rule::Citation
                | Rule::Header
                | Rule::ListItem
                | Rule::Definition
                | Rule::Indent
                | Rule::RowClose
                | Rule::Cell
        )
    }
}

/// Group order of the combined line pattern.
const LINE_RULE_ORDER: [Rule; 28] = [
    Rule::BoldItalic,
    Rule::Bold,
    Rule::Italic,
    Rule::Underline,
    Rule::Strike,
    Rule::Subscript,
    Rule::Superscript,
    Rule::BraceCode,
    Rule::BacktickCode,
    Rule::Ticket,
    Rule::Report,
    Rule::Log,
    Rule::Changeset,
    Rule::TracLink,
    Rule::BracketLink,
    Rule::Macro,
    Rule::WikiPageName,
    Rule::QuotedLink,
    Rule::AngleLink,
    Rule::NamedAnchor,
    Rule::EscapedPipes,
    Rule::Citation,
    Rule::Header,
    Rule::ListItem,
    Rule::Definition,
    Rule::Indent,
    Rule::RowClose,
    Rule::Cell,
];

/// Patterns of the inline rules, in [`Rule`] order. None contains a capture
/// group; the combined pattern wraps each in its own group.
fn inline_rule_patterns() -> Vec<String> {
    let page = wiki_page_name();
    let link = trac_link();
    vec![
        "!?'''''".to_string(),
        "!?'''".to_string(),
        "!?''".to_string(),
        "!?__".to_string(),
        "!?~~".to_string(),
        "!?,,".to_string(),
        r"!?\^".to_string(),
        r"!?\{\{\{.*?\}\}\}".to_string(),
        "!?`.*?`".to_string(),
        r"[!&]?\#\d+".to_string(),
        r"!?\{\d+\}".to_string(),
        format!(
            r"!?\[{CHANGESET_ID}[-:]{CHANGESET_ID}(?:{CHANGESET_PATH})?\]|(?:\b|!)r{CHANGESET_ID}[-:]{CHANGESET_ID}\b"
        ),
        format!(r"!?\[{CHANGESET_ID}(?:{CHANGESET_PATH})?\]|(?:\b|!)r{CHANGESET_ID}\b"),
        format!("!?{link}"),
        format!(
            r"!?\[(?:[/.#][^\[\]{WS}]*|{LINK_SCHEME}:(?:{QUOTED_STRING}|[^\]{WS}]*)|{page}[{WS}]+(?:{QUOTED_STRING}|[^\]]+))(?:[{WS}]+(?:{QUOTED_STRING}|[^\]]+))?\]"
        ),
        r"!?\[\[(?:[\w/+-]+\??|\?)(?:\]\]|\(.*?\)\]\])".to_string(),
        format!(r"(?:\b|!){page}"),
        format!(r"!?\[(?:{QUOTED_STRING})\]"),
        format!("!?<{LINK_SCHEME}:[^>]+>"),
        format!(r"!?\[=\#{XML_NAME}(?:[{WS}]+[^\]]*)?\]"),
    ]
}

fn block_rule_patterns() -> Vec<String> {
    vec![
        format!(r"!=?(?:\|\|)+(?:[{WS}]*$)?"),
        format!(r"^(?: *>)+[{WS}]*"),
        format!(r"^[{WS}]*={{1,6}}[{WS}]+.*?(?:\#{XML_NAME})?[{WS}]*$"),
        format!(r"^[{WS}]*(?:[-*]|[0-9]+\.|[a-zA-Z]\.|[ivxIVX]{{1,5}}\.) "),
        format!(r"^[{WS}]+(?:`[^`]*`|\{{\{{\{{.*?\}}\}}\}}|[^`{{:]|:[^:])+::(?:[{WS}]+|$)"),
        format!(r"^[{WS}]+"),
        format!(r"=?(?:\|\|)+[{WS}]*\\?$"),
        r"=?(?:\|\|)+=?".to_string(),
    ]
}

/// Combined line pattern: every rule in priority order, one capture group per
/// rule so the scanner can recover the rule identity.
static LINE_RULES: Lazy<Regex> = Lazy::new(|| {
    let mut groups: Vec<String> = Vec::new();
    for pattern in inline_rule_patterns().into_iter().chain(block_rule_patterns()) {
        groups.push(format!("({pattern})"));
    }
    Regex::new(&format!("(?:{})", groups.join("|"))).expect("line rule pattern")
});

/// Escape-protection pattern for serialized text: the inline rules plus the
/// cell separator form.
pub static ESCAPE_RULES: Lazy<Regex> = Lazy::new(|| {
    let mut patterns = inline_rule_patterns();
    patterns.push(r"!?=?(?:\|\|)+=?".to_string());
    let joined: Vec<String> = patterns.into_iter().map(|p| format!("(?:{p})")).collect();
    Regex::new(&format!("(?:{})", joined.join("|"))).expect("escape rule pattern")
});

/// Anchored match of any short link form (ticket, report, changeset, log).
pub static WIKI_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:\#\d+|\{{\d+\}}|\[{CHANGESET_ID}(?:{CHANGESET_PATH})?\]|r{CHANGESET_ID}\b|\[{CHANGESET_ID}[-:]{CHANGESET_ID}(?:{CHANGESET_PATH})?\]|r{CHANGESET_ID}[-:]{CHANGESET_ID}\b)$"
    ))
    .expect("wiki syntax pattern")
});

/// Distinguishes a log range from a changeset among the bracket/`r` forms.
pub static LOG_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^[\[r]{CHANGESET_ID}[-:]")).expect("log syntax pattern"));

/// Anchored canonical `scheme:target` link.
pub static TRAC_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:{})$", trac_link())).expect("trac link pattern"));

/// Anchored bare wiki page name.
pub static WIKI_PAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:{})$", wiki_page_name())).expect("page name pattern"));

/// Anchored fragment/anchor name.
pub static ANCHOR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{XML_NAME}$")).expect("anchor name pattern"));

/// A single rule match within a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule: Rule,
    pub start: usize,
    pub end: usize,
}

/// Stateful cursor over one line of input. The scanner owns the only mutable
/// matching state; the compiled pattern itself is shared and immutable.
#[derive(Debug)]
pub struct RuleScanner {
    pos: usize,
}

impl RuleScanner {
    pub fn new() -> Self {
        RuleScanner { pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Repositions the cursor, e.g. after the parser rewrites the line buffer.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Finds the next rule match at or after the cursor, advancing past it.
    /// Anchored block rules only match while the cursor sits at offset zero.
    pub fn next(&mut self, line: &str) -> Option<RuleMatch> {
        if self.pos > line.len() {
            return None;
        }
        let caps = LINE_RULES.captures_at(line, self.pos)?;
        for (index, rule) in LINE_RULE_ORDER.iter().enumerate() {
            if let Some(group) = caps.get(index + 1) {
                self.pos = group.end();
                return Some(RuleMatch {
                    rule: *rule,
                    start: group.start(),
                    end: group.end(),
                });
            }
        }
        None
    }
}

impl Default for RuleScanner {
    fn default() -> Self {
        RuleScanner::new()
    }
}

/// Validates the character following a bare wiki page name match, standing in
/// for the original grammar's trailing lookahead: the name must be followed
/// by nothing, whitespace, a `:` at a word boundary, or a non-word character.
pub fn wiki_page_name_boundary_ok(line: &str, end: usize) -> bool {
    let mut chars = line[end..].chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_whitespace() => true,
        Some(':') => match chars.next() {
            None => true,
            Some(next) => next.is_whitespace(),
        },
        Some(c) => !(c.is_alphanumeric() || c == '_'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(line: &str) -> Option<RuleMatch> {
        RuleScanner::new().next(line)
    }

    #[test]
    fn priority_prefers_bolditalic_over_bold() {
        let m = first("'''''x'''''").unwrap();
        assert_eq!(m.rule, Rule::BoldItalic);
        assert_eq!((m.start, m.end), (0, 5));
    }

    #[test]
    fn header_line_matches_at_start_only() {
        let m = first("== Title ==").unwrap();
        assert_eq!(m.rule, Rule::Header);

        let mut scanner = RuleScanner::new();
        scanner.set_pos(1);
        // Anchored rules cannot match once the cursor has moved.
        let m = scanner.next("== Title ==");
        assert!(m.map(|m| m.rule) != Some(Rule::Header));
    }

    #[test]
    fn list_rule_beats_indent_rule() {
        let m = first(" * item").unwrap();
        assert_eq!(m.rule, Rule::ListItem);
        assert_eq!(&" * item"[m.start..m.end], " * ");
    }

    #[test]
    fn log_range_wins_over_changeset_revision() {
        let m = first("r123:456").unwrap();
        assert_eq!(m.rule, Rule::Log);
        assert_eq!(m.end, 8);

        let m = first("r123").unwrap();
        assert_eq!(m.rule, Rule::Changeset);
    }

    #[test]
    fn row_close_requires_line_end() {
        let m = first("|| cell ||").unwrap();
        assert_eq!(m.rule, Rule::Cell);
        let mut scanner = RuleScanner::new();
        scanner.set_pos(2);
        let m = scanner.next("|| cell ||").unwrap();
        assert_eq!(m.rule, Rule::RowClose);
        assert_eq!(m.start, 8);
    }

    #[test]
    fn ticket_and_report_forms() {
        assert_eq!(first("#123").unwrap().rule, Rule::Ticket);
        assert_eq!(first("{45}").unwrap().rule, Rule::Report);
        assert_eq!(first("&#8212;").unwrap().rule, Rule::Ticket);
    }

    #[test]
    fn page_name_boundary() {
        assert!(wiki_page_name_boundary_ok("WikiPage", 8));
        assert!(wiki_page_name_boundary_ok("WikiPage and", 8));
        assert!(wiki_page_name_boundary_ok("WikiPage: x", 8));
        assert!(!wiki_page_name_boundary_ok("WikiPage1", 8));
        assert!(!wiki_page_name_boundary_ok("WikiPage:x", 8));
    }

    #[test]
    fn escape_rules_flag_inline_constructs() {
        assert!(ESCAPE_RULES.is_match("'''bold'''"));
        assert!(ESCAPE_RULES.is_match("see #12"));
        assert!(ESCAPE_RULES.is_match("a || b"));
        assert!(!ESCAPE_RULES.is_match("plain words"));
    }

    #[test]
    fn wiki_syntax_recognizes_short_forms() {
        for form in ["#1", "{2}", "[123]", "r123", "[12:34]", "r12-34"] {
            assert!(WIKI_SYNTAX.is_match(form), "{form}");
        }
        assert!(!WIKI_SYNTAX.is_match("ticket:1"));
        assert!(LOG_SYNTAX.is_match("[12:34]"));
        assert!(!LOG_SYNTAX.is_match("[1234]"));
    }
}
