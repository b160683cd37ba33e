//! Link parsing: short syntactic forms, bare page names with their trailing
//! boundary, bracketed links with quoted labels, and named anchors.

use tracwiki::wiki::testing::{assert_tree, anchor, element, fragment, paragraph, text};
use tracwiki::{wikitext_to_tree, ElementKind, Options};

fn parse(source: &str) -> tracwiki::Node {
    wikitext_to_tree(source, &Options::default())
}

#[test]
fn short_forms_normalize_to_schemes() {
    assert_tree(
        &parse("see #12, {3}, [456] and r789"),
        &fragment(vec![paragraph(vec![
            text("see "),
            anchor("ticket:12", "#12"),
            text(", "),
            anchor("report:3", "{3}"),
            text(", "),
            anchor("changeset:456", "[456]"),
            text(" and "),
            anchor("changeset:789", "r789"),
        ])]),
    );
}

#[test]
fn revision_ranges_use_the_log_scheme() {
    assert_tree(
        &parse("r1:2 and [3:4]"),
        &fragment(vec![paragraph(vec![
            anchor("log:@1:2", "r1:2"),
            text(" and "),
            anchor("log:@3:4", "[3:4]"),
        ])]),
    );
}

#[test]
fn bare_page_name_links() {
    assert_tree(
        &parse("visit WikiStart today"),
        &fragment(vec![paragraph(vec![
            text("visit "),
            anchor("wiki:WikiStart", "WikiStart"),
            text(" today"),
        ])]),
    );
}

#[test]
fn page_name_with_word_character_after_is_text() {
    assert_tree(
        &parse("WikiPage1"),
        &fragment(vec![paragraph(vec![text("WikiPage1")])]),
    );
}

#[test]
fn escaped_page_name_is_text() {
    assert_tree(
        &parse("!WikiStart"),
        &fragment(vec![paragraph(vec![text("WikiStart")])]),
    );
}

#[test]
fn bracket_link_with_label() {
    assert_tree(
        &parse("[wiki:SandBox the sandbox]"),
        &fragment(vec![paragraph(vec![anchor(
            "wiki:SandBox",
            "the sandbox",
        )])]),
    );
}

#[test]
fn bracket_link_with_quoted_label() {
    assert_tree(
        &parse("[wiki:SandBox 'my label']"),
        &fragment(vec![paragraph(vec![anchor("wiki:SandBox", "my label")])]),
    );
}

#[test]
fn bracket_link_without_label_strips_the_scheme() {
    assert_tree(
        &parse("[http://example.org/]"),
        &fragment(vec![paragraph(vec![anchor(
            "http://example.org/",
            "//example.org/",
        )])]),
    );
}

#[test]
fn bracketed_bare_page_name_keeps_literal_brackets() {
    // The label-less bracket form only accepts schemed or path targets; a
    // bare page name inside brackets links by itself.
    assert_tree(
        &parse("[SandBox]"),
        &fragment(vec![paragraph(vec![
            text("["),
            anchor("wiki:SandBox", "SandBox"),
            text("]"),
        ])]),
    );
}

#[test]
fn quoted_page_name_link() {
    assert_tree(
        &parse(r#"["My Page"]"#),
        &fragment(vec![paragraph(vec![anchor(
            r#"wiki:"My Page""#,
            "My Page",
        )])]),
    );
}

#[test]
fn full_trac_link_in_text() {
    assert_tree(
        &parse("wiki:TracLinks"),
        &fragment(vec![paragraph(vec![anchor(
            "wiki:TracLinks",
            "wiki:TracLinks",
        )])]),
    );
}

#[test]
fn angle_bracket_link_keeps_the_brackets_as_text() {
    assert_tree(
        &parse("<http://example.org/x>"),
        &fragment(vec![paragraph(vec![
            text("<"),
            anchor("http://example.org/x", "http://example.org/x"),
            text(">"),
        ])]),
    );
}

#[test]
fn named_anchor_with_label() {
    assert_tree(
        &parse("[=#point Jump here] and text"),
        &fragment(vec![paragraph(vec![
            element(
                ElementKind::AnchorSpan {
                    id: "point".to_string(),
                },
                vec![text("Jump here")],
            ),
            text(" and text"),
        ])]),
    );
}
