//! Wikitext to node-tree parsing
//!
//!     The parser is strictly line oriented. Each line is first checked for
//!     code-fence state, horizontal rules and blank lines, then scanned with
//!     the shared rule set. Block context lives in explicit parser state: an
//!     open-element stack, a quote-depth stack of indent widths, a list-depth
//!     stack of indent widths, and flags for the paragraph, definition-list
//!     and table modes. Inline decoration state is tracked per line with an
//!     ordered decoration stack so `'''''` can split into bold and italic by
//!     open order and out-of-order closes can close-and-reopen.
//!
//!     Parsing is total: malformed markup degrades to literal text, and an
//!     unterminated code fence is flushed at end of input. Nested lists are
//!     built as children of their containing list item, so item depth always
//!     equals the count of ancestor lists.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::wiki::ast::{Alignment, Element, ElementKind, Node, NumberingStyle};
use crate::wiki::grammar::{
    self, Rule, RuleMatch, RuleScanner, LINK_SCHEME, QUOTED_STRING, XML_NAME,
};
use crate::wiki::link::convert_wiki_syntax;
use crate::wiki::Options;

const HS: &[char] = &[' ', '\t', '\r', '\x0C', '\x0B'];

static OPEN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ *\{\{\{ *$").expect("open fence pattern"));
static CLOSE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ *\}\}\} *$").expect("close fence pattern"));
static QUOTE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?: *>)+").expect("quote run pattern"));
static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(=+)[ \t\r\x0C\x0B]+.*?(?:#([^ \t\r\x0C\x0B]+))?[ \t\r\x0C\x0B]*$")
        .expect("header line pattern")
});
static HEADER_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[ \t\r\x0C\x0B]+#[^ \t\r\x0C\x0B]+)?[ \t\r\x0C\x0B]*$")
        .expect("header trailing pattern")
});
static LEADING_EQUALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(=+)[ \t\r\x0C\x0B]+").expect("leading equals pattern"));
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(?:([-*])|((?:([0-9]+)|([a-z])|([A-Z])|[ivxIVX]{1,5})))")
        .expect("list marker pattern")
});
static DEFINITION_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t\r\x0C\x0B]+(.*?)\s*::").expect("definition term pattern"));
static BRACKET_LINK_PARTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\[((?:{LINK_SCHEME}:)?(?:{QUOTED_STRING}|[^\]\s]+))(?:\s+(.*))?\]"
    ))
    .expect("bracket link pattern")
});
static LINK_OR_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[\w.+-]+:|[/.#].*)").expect("link or path pattern"));
static SCHEME_STRIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.+-]+:").expect("scheme strip pattern"));
static NAMED_ANCHOR_PARTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\[=\#({XML_NAME})(?:[ \t\r\x0C\x0B]+([^\]]*))?\]$"
    ))
    .expect("named anchor pattern")
});
static BR_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^!?\[\[br\]\]$").expect("br macro pattern"));

/// Converts wikitext to a node tree rooted at a `Fragment`. Never fails.
pub fn wikitext_to_tree(source: &str, options: &Options) -> Node {
    Parser::new(*options).parse(source)
}

/// Parses an inline-only snippet and returns the children of the first block,
/// used for definition terms and anchor labels.
pub(crate) fn wikitext_to_oneliner(source: &str, options: &Options) -> Vec<Node> {
    let Node::Element(root) = wikitext_to_tree(source, options) else {
        return Vec::new();
    };
    match root.children.into_iter().next() {
        Some(Node::Element(first)) => first.children,
        Some(text @ Node::Text(_)) => vec![text],
        None => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoration {
    Bold,
    Italic,
    Underline,
    Strike,
    Subscript,
    Superscript,
}

impl Decoration {
    fn kind(self) -> ElementKind {
        match self {
            Decoration::Bold => ElementKind::Bold,
            Decoration::Italic => ElementKind::Italic,
            Decoration::Underline => ElementKind::Underline,
            Decoration::Strike => ElementKind::Strike,
            Decoration::Subscript => ElementKind::Subscript,
            Decoration::Superscript => ElementKind::Superscript,
        }
    }
}

/// Literal token an empty, implicitly closed decoration falls back to.
fn decoration_token(kind: &ElementKind) -> Option<&'static str> {
    Some(match kind {
        ElementKind::Bold => "'''",
        ElementKind::Italic => "''",
        ElementKind::Underline => "__",
        ElementKind::Strike => "~~",
        ElementKind::Subscript => ",,",
        ElementKind::Superscript => "^",
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Blockquote,
    ListItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowAction {
    Open,
    Continue,
    Close,
}

struct Parser {
    options: Options,
    stack: Vec<Element>,
    code_depth: u32,
    code_lines: Vec<String>,
    current_header: bool,
    quote_depth: Vec<usize>,
    list_depth: Vec<usize>,
    decoration_stack: Vec<Decoration>,
    in_paragraph: bool,
    in_def_list: bool,
    in_table: bool,
    in_table_row: bool,
    continue_table_row: bool,
}

impl Parser {
    fn new(options: Options) -> Self {
        Parser {
            options,
            stack: vec![Element::new(ElementKind::Fragment)],
            code_depth: 0,
            code_lines: Vec::new(),
            current_header: false,
            quote_depth: Vec::new(),
            list_depth: Vec::new(),
            decoration_stack: Vec::new(),
            in_paragraph: false,
            in_def_list: false,
            in_table: false,
            in_table_row: false,
            continue_table_row: false,
        }
    }

    fn parse(mut self, source: &str) -> Node {
        for raw in source.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if self.code_depth > 0 || OPEN_FENCE.is_match(line) {
                self.handle_code_block(line);
                continue;
            }
            if line.starts_with("----") {
                self.close_to_fragment(None);
                self.append_element(Element::new(ElementKind::HorizontalRule));
                continue;
            }
            if line.trim().is_empty() {
                self.close_to_fragment(None);
                continue;
            }
            let line = line.replace('\t', "        ").replace('\u{a0}', " ");
            self.scan_line(line);
            if self.current_header {
                self.close_header();
            }
            if self.in_table {
                if self.continue_table_row {
                    self.continue_table_row = false;
                } else {
                    self.handle_table_cell(RowAction::Close, 0, false, Alignment::Default);
                }
            }
        }
        if self.code_depth > 0 {
            self.flush_code_block();
        }
        self.close_to_fragment(None);
        let root = self.stack.pop().unwrap_or_else(|| Element::new(ElementKind::Fragment));
        Node::Element(root)
    }

    fn scan_line(&mut self, mut line: String) {
        let mut scanner = RuleScanner::new();
        let mut prev_index = 0usize;
        self.decoration_stack.clear();
        loop {
            let m = scanner.next(&line);
            let text: Option<String> = match m {
                Some(mm) if prev_index < mm.start => {
                    Some(line[prev_index..mm.start].to_string())
                }
                Some(_) => None,
                None => line
                    .get(prev_index..)
                    .filter(|rest| !rest.is_empty())
                    .map(str::to_string),
            };
            let inline_match = m.map(|mm| mm.rule.is_inline()).unwrap_or(false);
            let match_at_zero = m.map(|mm| mm.start == 0).unwrap_or(false);

            if ((prev_index == 0 && text.is_some()) || (match_at_zero && inline_match))
                && (!self.in_paragraph || !self.quote_depth.is_empty())
                && (!self.in_def_list || !line.starts_with(' '))
            {
                self.close_to_fragment(None);
            }
            if text.is_some() || inline_match {
                let mut text = text;
                if self.in_paragraph && (prev_index == 0 || !self.quote_depth.is_empty()) {
                    if self.options.escape_newlines {
                        if self.quote_depth.is_empty() {
                            self.append_element(Element::new(ElementKind::LineBreak));
                        }
                    } else {
                        text = Some(match text {
                            Some(t) => format!(" {t}"),
                            None => " ".to_string(),
                        });
                    }
                }
                if (!self.in_table && !self.quote_depth.is_empty()) || self.stack.len() == 1 {
                    self.open_paragraph();
                }
                if let Some(t) = text {
                    self.append_text(&t);
                }
            }
            let Some(m) = m else { break };
            prev_index = scanner.pos();
            let mut match_text = line[m.start..m.end].to_string();

            if !match_text.starts_with('!') {
                match m.rule {
                    Rule::BoldItalic => {
                        self.toggle_bold_italic();
                        continue;
                    }
                    Rule::Bold => {
                        self.toggle(Decoration::Bold);
                        continue;
                    }
                    Rule::Italic => {
                        self.toggle(Decoration::Italic);
                        continue;
                    }
                    Rule::Underline => {
                        self.toggle(Decoration::Underline);
                        continue;
                    }
                    Rule::Strike => {
                        self.toggle(Decoration::Strike);
                        continue;
                    }
                    Rule::Subscript => {
                        self.toggle(Decoration::Subscript);
                        continue;
                    }
                    Rule::Superscript => {
                        self.toggle(Decoration::Superscript);
                        continue;
                    }
                    Rule::BraceCode => {
                        self.append_inline_code(&match_text, 3);
                        continue;
                    }
                    Rule::BacktickCode => {
                        self.append_inline_code(&match_text, 1);
                        continue;
                    }
                    Rule::Ticket => {
                        // entity guard: a numeric character reference is text
                        if !match_text.starts_with('&') {
                            self.append_syntax_link(&match_text);
                            continue;
                        }
                    }
                    Rule::Report | Rule::Log | Rule::Changeset => {
                        self.append_syntax_link(&match_text);
                        continue;
                    }
                    Rule::TracLink => {
                        self.append_anchor(&match_text, &match_text);
                        continue;
                    }
                    Rule::BracketLink => {
                        self.append_bracket_link(&match_text);
                        continue;
                    }
                    Rule::Macro => {}
                    Rule::WikiPageName => {
                        if grammar::wiki_page_name_boundary_ok(&line, m.end) {
                            let link = format!("wiki:{match_text}");
                            self.append_anchor(&link, &match_text);
                            continue;
                        }
                    }
                    Rule::QuotedLink => {
                        let name = &match_text[1..match_text.len() - 1];
                        let label = &match_text[2..match_text.len() - 2];
                        let link = format!("wiki:{name}");
                        self.append_anchor(&link, label);
                        continue;
                    }
                    Rule::AngleLink => {
                        self.append_angle_link(&match_text);
                        continue;
                    }
                    Rule::NamedAnchor => {
                        self.append_named_anchor(&match_text);
                        continue;
                    }
                    Rule::EscapedPipes => {}
                    Rule::Citation => {
                        if self.options.escape_newlines && self.in_paragraph {
                            self.append_element(Element::new(ElementKind::LineBreak));
                        }
                        self.handle_citation(&match_text);
                        if self.options.escape_newlines {
                            self.open_paragraph();
                        }
                        continue;
                    }
                    Rule::Header => {
                        if self.start_header(&mut line, &mut scanner, &mut prev_index) {
                            continue;
                        }
                    }
                    Rule::ListItem => {
                        self.handle_list(&match_text);
                        continue;
                    }
                    Rule::Definition => {
                        self.handle_definition(&match_text);
                        continue;
                    }
                    Rule::Indent => {
                        if self.list_depth.is_empty() && !self.in_def_list {
                            self.handle_indent(&match_text);
                            continue;
                        }
                        if !self.last_child_is_inline() {
                            continue;
                        }
                        match_text = " ".to_string();
                    }
                    Rule::RowClose => {
                        if self.in_table {
                            if match_text.ends_with('\\') {
                                self.continue_table_row = true;
                            } else {
                                self.handle_table_cell(
                                    RowAction::Close,
                                    0,
                                    false,
                                    Alignment::Default,
                                );
                            }
                            continue;
                        }
                    }
                    Rule::Cell => {
                        self.scan_cell(&mut line, &mut scanner, prev_index, m, &match_text);
                        continue;
                    }
                }
            }

            if !match_text.is_empty() {
                if self.list_depth.is_empty()
                    && !self.current_header
                    && !self.in_def_list
                    && !self.in_table
                {
                    self.open_paragraph();
                }
                if m.rule == Rule::Macro {
                    if BR_MACRO.is_match(&match_text) {
                        match match_text.strip_prefix('!') {
                            Some(rest) => self.append_text(rest),
                            None => self.append_element(Element::new(ElementKind::LineBreak)),
                        }
                    } else {
                        // non-BR macros pass through verbatim, escape included
                        self.append_text(&match_text);
                    }
                } else {
                    let literal = match_text.strip_prefix('!').unwrap_or(&match_text);
                    self.append_text(literal);
                }
            }
        }
    }

    // --- holder stack primitives ---

    fn top(&mut self) -> &mut Element {
        self.stack.last_mut().expect("root fragment always present")
    }

    fn top_kind(&self) -> &ElementKind {
        &self.stack.last().expect("root fragment always present").kind
    }

    fn append_text(&mut self, text: &str) {
        self.top().push(Node::text(text));
    }

    fn append_element(&mut self, element: Element) {
        self.top().push(Node::Element(element));
    }

    fn open(&mut self, kind: ElementKind) {
        self.stack.push(Element::new(kind));
    }

    /// Closes the innermost open element. An empty decoration degrades to its
    /// literal open token, so a dangling `'''` at end of input stays text.
    fn close_one(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let element = self.stack.pop().expect("stack is non-empty");
        if element.children.is_empty() {
            if let Some(token) = decoration_token(&element.kind) {
                self.append_text(token);
                return;
            }
        }
        self.append_element(element);
    }

    fn close_until(&mut self, pred: impl Fn(&ElementKind) -> bool) -> bool {
        while self.stack.len() > 1 {
            let matched = pred(self.top_kind());
            self.close_one();
            if matched {
                return true;
            }
        }
        false
    }

    fn close_to_fragment(&mut self, stop: Option<Stop>) {
        while self.stack.len() > 1 {
            match (self.top_kind(), stop) {
                (ElementKind::Blockquote { .. }, Some(Stop::Blockquote))
                | (ElementKind::ListItem, Some(Stop::ListItem)) => return,
                _ => {}
            }
            match self.top_kind() {
                ElementKind::Paragraph => {
                    self.close_one();
                    self.in_paragraph = false;
                }
                ElementKind::List { .. } => {
                    self.close_one();
                    self.list_depth.pop();
                }
                ElementKind::Blockquote { .. } => {
                    self.close_one();
                    self.quote_depth.pop();
                }
                ElementKind::DefinitionList => {
                    self.close_one();
                    self.in_def_list = false;
                }
                ElementKind::Table => {
                    self.close_one();
                    self.in_table = false;
                    self.in_table_row = false;
                }
                ElementKind::TableRow => {
                    self.close_one();
                    self.in_table_row = false;
                }
                ElementKind::Header { .. } => {
                    self.close_one();
                    self.current_header = false;
                }
                _ => self.close_one(),
            }
        }
    }

    // --- paragraphs ---

    fn open_paragraph(&mut self) {
        if !self.in_paragraph {
            self.open(ElementKind::Paragraph);
            self.in_paragraph = true;
        }
    }

    fn close_paragraph(&mut self) {
        if self.in_paragraph {
            self.close_until(|kind| matches!(kind, ElementKind::Paragraph));
            self.in_paragraph = false;
        }
    }

    // --- code blocks ---

    fn handle_code_block(&mut self, line: &str) {
        if OPEN_FENCE.is_match(line) {
            self.code_depth += 1;
            if self.code_depth == 1 {
                self.close_paragraph();
                self.code_lines.clear();
            } else {
                self.code_lines.push(line.to_string());
            }
        } else if CLOSE_FENCE.is_match(line) {
            self.code_depth -= 1;
            if self.code_depth == 0 {
                self.flush_code_block();
            } else {
                self.code_lines.push(line.to_string());
            }
        } else {
            self.code_lines.push(line.to_string());
        }
    }

    fn flush_code_block(&mut self) {
        // unterminated inner fences are balanced so the content re-parses to
        // the same nesting depth
        while self.code_depth > 1 {
            self.code_lines.push("}}}".to_string());
            self.code_depth -= 1;
        }
        let mut pre = Element::new(ElementKind::Preformatted);
        pre.push(Node::text(self.code_lines.join("\n")));
        self.append_element(pre);
        self.code_lines.clear();
        self.code_depth = 0;
    }

    // --- quotes ---

    fn handle_citation(&mut self, value: &str) {
        let quote = QUOTE_RUN
            .find(value)
            .map(|m| m.as_str())
            .unwrap_or_default();
        let depth = quote.chars().filter(|c| *c == '>').count();
        if depth > self.quote_depth.len() {
            self.close_to_fragment(Some(Stop::Blockquote));
            while depth > self.quote_depth.len() {
                let length = citation_prefix_len(quote, self.quote_depth.len() + 1);
                self.open_quote(length, true);
            }
        } else if depth < self.quote_depth.len() {
            self.close_paragraph();
            while depth < self.quote_depth.len() {
                self.close_quote();
            }
        }
    }

    fn open_quote(&mut self, length: usize, citation: bool) {
        if self.stack.len() > 1 {
            self.close_to_fragment(Some(Stop::Blockquote));
        }
        self.open(ElementKind::Blockquote { citation });
        self.quote_depth.push(length);
    }

    fn close_quote(&mut self) {
        self.close_until(|kind| matches!(kind, ElementKind::Blockquote { .. }));
        self.quote_depth.pop();
    }

    fn handle_indent(&mut self, value: &str) {
        let depth = value.len();
        if depth > self.quote_depth.last().copied().unwrap_or(0) {
            self.close_paragraph();
            self.close_table();
            self.open_quote(depth, false);
        } else {
            while let Some(last) = self.quote_depth.last().copied() {
                if depth >= last {
                    break;
                }
                self.close_to_fragment(Some(Stop::Blockquote));
                self.close_quote();
            }
            if let Some(last) = self.quote_depth.last_mut() {
                *last = depth;
            }
        }
    }

    // --- headers ---

    fn start_header(
        &mut self,
        line: &mut String,
        scanner: &mut RuleScanner,
        prev_index: &mut usize,
    ) -> bool {
        let (level, fragment) = match HEADER_LINE.captures(line) {
            Some(caps) => (
                caps[1].len().min(6) as u8,
                caps.get(2)
                    .map(|m| m.as_str().to_string())
                    .filter(|id| grammar::ANCHOR_NAME.is_match(id)),
            ),
            None => return false,
        };
        self.close_to_fragment(None);
        self.open(ElementKind::Header { level, fragment });
        self.current_header = true;

        // strip the trailing fragment and closing '=' run, then rescan the
        // body only
        let stripped = HEADER_TRAILING.replace(line, "").into_owned();
        *line = stripped;
        if let Some(caps) = LEADING_EQUALS.captures(line) {
            let marker_len = caps[0].len();
            let run = caps[1].to_string();
            if line.len() >= run.len() && line.ends_with(run.as_str()) {
                line.truncate(line.len() - run.len());
                let trimmed = line.trim_end_matches(HS).len();
                line.truncate(trimmed);
            }
            scanner.set_pos(marker_len);
            *prev_index = marker_len;
        }
        true
    }

    fn close_header(&mut self) {
        self.close_until(|kind| matches!(kind, ElementKind::Header { .. }));
        self.current_header = false;
    }

    // --- lists ---

    fn handle_list(&mut self, value: &str) {
        let Some(caps) = LIST_MARKER.captures(value) else {
            self.append_text(value);
            return;
        };
        let depth = caps[1].len();
        let (ordered, style, start) = if caps.get(2).is_some() {
            (false, NumberingStyle::Arabic, None)
        } else {
            let marker = &caps[3];
            let (style, start) = match marker {
                "0" => (NumberingStyle::ArabicZero, None),
                "1" => (NumberingStyle::Arabic, None),
                "i" => (NumberingStyle::LowerRoman, None),
                "I" => (NumberingStyle::UpperRoman, None),
                _ => {
                    if let Some(digits) = caps.get(4) {
                        (NumberingStyle::Arabic, digits.as_str().parse::<u32>().ok())
                    } else if caps.get(5).is_some() {
                        (NumberingStyle::LowerAlpha, None)
                    } else if caps.get(6).is_some() {
                        (NumberingStyle::UpperAlpha, None)
                    } else {
                        (NumberingStyle::Arabic, None)
                    }
                }
            };
            (true, style, start)
        };

        let last = self.list_depth.last().copied();
        if last.map(|l| depth > l).unwrap_or(true) {
            self.close_to_fragment(Some(Stop::ListItem));
            self.open_list(ordered, style, start, depth);
            return;
        }
        while self.list_depth.len() > 1
            && depth < self.list_depth.last().copied().unwrap_or(0)
        {
            self.close_list();
        }
        // sibling item at the current level: close the open item and compare
        // against its list
        while self.stack.len() > 1
            && !matches!(
                self.top_kind(),
                ElementKind::ListItem | ElementKind::List { .. }
            )
        {
            self.close_one();
        }
        if matches!(self.top_kind(), ElementKind::ListItem) {
            self.close_one();
        }
        match self.top_kind() {
            ElementKind::List {
                ordered: open_ordered,
                ..
            } if *open_ordered == ordered => {
                self.open(ElementKind::ListItem);
                if let Some(last) = self.list_depth.last_mut() {
                    *last = depth;
                }
            }
            ElementKind::List { .. } => {
                self.close_one();
                self.list_depth.pop();
                self.open_list(ordered, style, start, depth);
            }
            _ => self.open_list(ordered, style, start, depth),
        }
    }

    fn open_list(
        &mut self,
        ordered: bool,
        style: NumberingStyle,
        start: Option<u32>,
        depth: usize,
    ) {
        self.open(ElementKind::List {
            ordered,
            style,
            start,
        });
        self.open(ElementKind::ListItem);
        self.list_depth.push(depth);
    }

    fn close_list(&mut self) {
        let has_item = self
            .stack
            .iter()
            .any(|el| matches!(el.kind, ElementKind::ListItem));
        if has_item {
            self.close_until(|kind| matches!(kind, ElementKind::ListItem));
            if matches!(self.top_kind(), ElementKind::List { .. }) {
                self.close_one();
            }
        } else if self.stack.len() > 1 {
            self.close_one();
        }
        self.list_depth.pop();
    }

    // --- definitions ---

    fn handle_definition(&mut self, value: &str) {
        if self.in_def_list {
            while self.stack.len() > 1
                && !matches!(self.top_kind(), ElementKind::DefinitionList)
            {
                self.close_one();
            }
        } else {
            self.close_paragraph();
            self.open(ElementKind::DefinitionList);
            self.in_def_list = true;
        }
        let term = DEFINITION_TERM
            .captures(value)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();
        let mut dt = Element::new(ElementKind::DefinitionTerm);
        for node in wikitext_to_oneliner(&term, &self.options) {
            dt.push(node);
        }
        self.append_element(dt);
        self.open(ElementKind::DefinitionDescription);
    }

    // --- tables ---

    fn scan_cell(
        &mut self,
        line: &mut String,
        scanner: &mut RuleScanner,
        prev_index: usize,
        m: RuleMatch,
        match_text: &str,
    ) {
        if !self.quote_depth.is_empty() && m.start == 0 {
            self.close_to_fragment(None);
        }
        let mut align = Alignment::Default;
        loop {
            let next = scanner.next(line);
            match next.map(|n| n.rule) {
                None | Some(Rule::RowClose) | Some(Rule::Cell) => {
                    let end = next.map(|n| n.start).unwrap_or(line.len());
                    if prev_index < end {
                        let segment = &line[prev_index..end];
                        let after_lead = segment.trim_start_matches(HS);
                        let lead = segment.len() - after_lead.len();
                        let core = after_lead.trim_end_matches(HS);
                        let trail = after_lead.len() - core.len();
                        if lead == segment.len() {
                            align = Alignment::Default;
                        } else if (lead == 0) == (trail == 0) {
                            align = if lead >= 2 && trail >= 2 {
                                Alignment::Center
                            } else {
                                Alignment::Default
                            };
                        } else {
                            align = if lead == 0 {
                                Alignment::Left
                            } else {
                                Alignment::Right
                            };
                        }
                        let rebuilt =
                            format!("{}{}{}", &line[..prev_index], core, &line[end..]);
                        *line = rebuilt;
                    }
                    break;
                }
                Some(_) => continue,
            }
        }
        scanner.set_pos(prev_index);
        let stripped = match_text.strip_prefix('=').unwrap_or(match_text);
        let stripped = stripped.strip_suffix('=').unwrap_or(stripped);
        let colspan = (stripped.len() / 2) as u32;
        let header = match_text.ends_with('=');
        let action = if self.in_table_row {
            RowAction::Continue
        } else {
            RowAction::Open
        };
        self.handle_table_cell(action, colspan, header, align);
    }

    fn handle_table_cell(
        &mut self,
        action: RowAction,
        colspan: u32,
        header: bool,
        align: Alignment,
    ) {
        if !self.in_table {
            self.close_to_fragment(Some(Stop::Blockquote));
            self.open(ElementKind::Table);
            self.in_table = true;
            self.in_table_row = false;
        }
        match action {
            RowAction::Open => {
                while self.stack.len() > 1 && !matches!(self.top_kind(), ElementKind::Table) {
                    self.close_one();
                }
                self.open(ElementKind::TableRow);
                self.in_table_row = true;
            }
            RowAction::Continue => {
                while self.stack.len() > 1 && !matches!(self.top_kind(), ElementKind::TableRow) {
                    self.close_one();
                }
            }
            RowAction::Close => {
                if self.in_table_row {
                    self.close_until(|kind| matches!(kind, ElementKind::TableRow));
                    self.in_table_row = false;
                }
                return;
            }
        }
        self.open(ElementKind::TableCell {
            header,
            colspan,
            align,
        });
        self.decoration_stack.clear();
    }

    fn close_table(&mut self) {
        if self.in_table {
            self.close_until(|kind| matches!(kind, ElementKind::Table));
            self.in_table = false;
            self.in_table_row = false;
        }
    }

    // --- inline content ---

    fn toggle_bold_italic(&mut self) {
        if self.decoration_stack.contains(&Decoration::Italic) {
            self.toggle(Decoration::Italic);
            self.toggle(Decoration::Bold);
        } else {
            self.toggle(Decoration::Bold);
            self.toggle(Decoration::Italic);
        }
    }

    fn toggle(&mut self, decoration: Decoration) {
        if let Some(idx) = self
            .decoration_stack
            .iter()
            .rposition(|d| *d == decoration)
        {
            // close, re-opening anything opened after it
            let count = self.decoration_stack.len() - idx;
            let mut reopen: Vec<ElementKind> = Vec::new();
            for step in 0..count {
                if self.stack.len() <= 1 {
                    break;
                }
                let element = self.stack.pop().expect("stack is non-empty");
                let kind = element.kind.clone();
                if !element.children.is_empty() {
                    self.append_element(element);
                }
                if step < count - 1 {
                    reopen.push(kind);
                }
            }
            self.decoration_stack.remove(idx);
            for kind in reopen.into_iter().rev() {
                self.open(kind);
            }
        } else {
            if self.stack.len() == 1 {
                self.open_paragraph();
            }
            self.open(decoration.kind());
            self.decoration_stack.push(decoration);
        }
    }

    fn append_inline_code(&mut self, value: &str, delimiter: usize) {
        let inner = &value[delimiter..value.len() - delimiter];
        if !inner.is_empty() {
            let mut code = Element::new(ElementKind::Code);
            code.push(Node::text(inner));
            self.append_element(code);
        }
    }

    fn append_anchor(&mut self, link: &str, label: &str) {
        let mut anchor = Element::new(ElementKind::Anchor {
            link: link.to_string(),
        });
        anchor.push(Node::text(label));
        self.append_element(anchor);
    }

    fn append_syntax_link(&mut self, value: &str) {
        let link = convert_wiki_syntax(value);
        self.append_anchor(&link, value);
    }

    fn append_bracket_link(&mut self, value: &str) {
        let Some(caps) = BRACKET_LINK_PARTS.captures(value) else {
            self.append_text(value);
            return;
        };
        let mut link = caps[1].to_string();
        if !LINK_OR_PATH.is_match(&link) {
            link = format!("wiki:{link}");
        }
        let label = match caps.get(2) {
            Some(label) => label.as_str().to_string(),
            None => SCHEME_STRIP.replace(&caps[1], "").into_owned(),
        };
        let label = unquote(&label);
        self.append_anchor(&link, label);
    }

    fn append_angle_link(&mut self, value: &str) {
        let link = &value[1..value.len() - 1];
        self.append_text("<");
        self.append_anchor(link, link);
        self.append_text(">");
    }

    fn append_named_anchor(&mut self, value: &str) {
        let Some(caps) = NAMED_ANCHOR_PARTS.captures(value) else {
            self.append_text(value);
            return;
        };
        let mut span = Element::new(ElementKind::AnchorSpan {
            id: caps[1].to_string(),
        });
        if let Some(label) = caps.get(2) {
            for node in wikitext_to_oneliner(label.as_str(), &self.options) {
                span.push(node);
            }
        }
        self.append_element(span);
    }

    fn last_child_is_inline(&self) -> bool {
        self.stack
            .last()
            .and_then(|el| el.children.last())
            .map(Node::is_inline)
            .unwrap_or(false)
    }
}

/// Byte length of the citation prefix covering `level` quote markers.
fn citation_prefix_len(quote: &str, level: usize) -> usize {
    let mut seen = 0;
    for (index, c) in quote.char_indices() {
        if c == '>' {
            seen += 1;
            if seen == level {
                return index + 1;
            }
        }
    }
    quote.len()
}

/// Strips one pair of matching quote characters from a link label.
fn unquote(label: &str) -> &str {
    let bytes = label.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &label[1..label.len() - 1]
    } else {
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Element {
        match wikitext_to_tree(source, &Options::default()) {
            Node::Element(el) => el,
            Node::Text(_) => panic!("root is always an element"),
        }
    }

    fn kind(node: &Node) -> &ElementKind {
        &node.as_element().expect("element").kind
    }

    #[test]
    fn paragraph_lines_join_with_a_space() {
        let root = parse("one\ntwo");
        assert_eq!(root.children.len(), 1);
        let p = root.children[0].as_element().unwrap();
        assert_eq!(p.kind, ElementKind::Paragraph);
        assert_eq!(p.children, vec![Node::text("one two")]);
    }

    #[test]
    fn blank_line_separates_paragraphs() {
        let root = parse("one\n\ntwo");
        assert_eq!(root.children.len(), 2);
        assert_eq!(*kind(&root.children[0]), ElementKind::Paragraph);
        assert_eq!(*kind(&root.children[1]), ElementKind::Paragraph);
    }

    #[test]
    fn escape_newlines_preserves_line_breaks() {
        let options = Options {
            escape_newlines: true,
            ..Options::default()
        };
        let Node::Element(root) = wikitext_to_tree("one\ntwo", &options) else {
            panic!();
        };
        let p = root.children[0].as_element().unwrap();
        assert_eq!(
            p.children,
            vec![
                Node::text("one"),
                Node::Element(Element::new(ElementKind::LineBreak)),
                Node::text("two"),
            ]
        );
    }

    #[test]
    fn escaped_bold_is_literal() {
        let root = parse("!'''not bold'''");
        let p = root.children[0].as_element().unwrap();
        assert_eq!(p.children, vec![Node::text("'''not bold'''")]);
    }

    #[test]
    fn bold_italic_splits_by_open_order() {
        let root = parse("'''''a''b'''");
        let p = root.children[0].as_element().unwrap();
        let b = p.children[0].as_element().unwrap();
        assert_eq!(b.kind, ElementKind::Bold);
        let i = b.children[0].as_element().unwrap();
        assert_eq!(i.kind, ElementKind::Italic);
        assert_eq!(i.children, vec![Node::text("a")]);
        assert_eq!(b.children[1], Node::text("b"));
    }

    #[test]
    fn nested_list_is_child_of_outer_item() {
        let root = parse(" * top\n   * nested\n * second");
        let list = root.children[0].as_element().unwrap();
        assert!(matches!(list.kind, ElementKind::List { ordered: false, .. }));
        assert_eq!(list.children.len(), 2);
        let first = list.children[0].as_element().unwrap();
        assert_eq!(first.kind, ElementKind::ListItem);
        assert_eq!(first.children[0], Node::text("top"));
        let nested = first.children[1].as_element().unwrap();
        assert!(matches!(nested.kind, ElementKind::List { .. }));
    }

    #[test]
    fn numbered_list_styles() {
        let root = parse(" i. roman\n");
        let list = root.children[0].as_element().unwrap();
        assert!(matches!(
            list.kind,
            ElementKind::List {
                ordered: true,
                style: NumberingStyle::LowerRoman,
                start: None,
            }
        ));

        let root = parse(" 3. third");
        let list = root.children[0].as_element().unwrap();
        assert!(matches!(
            list.kind,
            ElementKind::List {
                ordered: true,
                style: NumberingStyle::Arabic,
                start: Some(3),
            }
        ));
    }

    #[test]
    fn citation_depth_builds_nested_blockquotes() {
        let root = parse("> outer\n> > inner");
        let outer = root.children[0].as_element().unwrap();
        assert_eq!(outer.kind, ElementKind::Blockquote { citation: true });
        let p = outer.children[0].as_element().unwrap();
        assert_eq!(p.kind, ElementKind::Paragraph);
        let inner = outer.children[1].as_element().unwrap();
        assert_eq!(inner.kind, ElementKind::Blockquote { citation: true });
    }

    #[test]
    fn header_strips_marker_and_fragment() {
        let root = parse("== Heading == #point");
        let h = root.children[0].as_element().unwrap();
        assert_eq!(
            h.kind,
            ElementKind::Header {
                level: 2,
                fragment: Some("point".to_string()),
            }
        );
        assert_eq!(h.children, vec![Node::text("Heading")]);
    }

    #[test]
    fn table_row_with_header_and_alignment() {
        let root = parse("||=Header=||  centered  ||right text||");
        let table = root.children[0].as_element().unwrap();
        assert_eq!(table.kind, ElementKind::Table);
        let row = table.children[0].as_element().unwrap();
        assert_eq!(row.kind, ElementKind::TableRow);
        assert_eq!(row.children.len(), 3);
        assert_eq!(
            *kind(&row.children[0]),
            ElementKind::TableCell {
                header: true,
                colspan: 1,
                align: Alignment::Default,
            }
        );
        assert_eq!(
            *kind(&row.children[1]),
            ElementKind::TableCell {
                header: false,
                colspan: 1,
                align: Alignment::Center,
            }
        );
    }

    #[test]
    fn code_fence_nests_and_flushes_at_eof() {
        let root = parse("{{{\nouter\n{{{\ninner\n}}}\n}}}");
        let pre = root.children[0].as_element().unwrap();
        assert_eq!(pre.kind, ElementKind::Preformatted);
        assert_eq!(
            pre.children,
            vec![Node::text("outer\n{{{\ninner\n}}}")]
        );

        let root = parse("{{{\nunterminated");
        let pre = root.children[0].as_element().unwrap();
        assert_eq!(pre.kind, ElementKind::Preformatted);
        assert_eq!(pre.children, vec![Node::text("unterminated")]);
    }

    #[test]
    fn unterminated_nested_fence_is_balanced() {
        // an unclosed inner fence gets its closing line on flush, so the
        // block content re-parses to the same nesting depth
        let root = parse("{{{\n{{{\n");
        let pre = root.children[0].as_element().unwrap();
        assert_eq!(pre.kind, ElementKind::Preformatted);
        assert_eq!(pre.children, vec![Node::text("{{{\n\n}}}")]);

        let root = parse("{{{\n{{{\n{{{\ndeep");
        let pre = root.children[0].as_element().unwrap();
        assert_eq!(pre.children, vec![Node::text("{{{\n{{{\ndeep\n}}}\n}}}")]);
    }

    #[test]
    fn ticket_link_is_normalized() {
        let root = parse("see #12");
        let p = root.children[0].as_element().unwrap();
        assert_eq!(p.children[0], Node::text("see "));
        let anchor = p.children[1].as_element().unwrap();
        assert_eq!(
            anchor.kind,
            ElementKind::Anchor {
                link: "ticket:12".to_string(),
            }
        );
        assert_eq!(anchor.children, vec![Node::text("#12")]);
    }

    #[test]
    fn definition_list_parses_term_and_description() {
        let root = parse(" term:: description");
        let dl = root.children[0].as_element().unwrap();
        assert_eq!(dl.kind, ElementKind::DefinitionList);
        let dt = dl.children[0].as_element().unwrap();
        assert_eq!(dt.kind, ElementKind::DefinitionTerm);
        assert_eq!(dt.children, vec![Node::text("term")]);
        let dd = dl.children[1].as_element().unwrap();
        assert_eq!(dd.kind, ElementKind::DefinitionDescription);
        assert_eq!(dd.children, vec![Node::text("description")]);
    }
}
