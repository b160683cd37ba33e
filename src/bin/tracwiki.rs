//! Command-line interface for tracwiki
//! This binary converts Trac wikitext read from a file (or stdin) into a JSON
//! node tree, re-renders it as canonical wikitext, or normalizes a link target.
//!
//! Usage:
//!   tracwiki parse `<path>` [--escape-newlines]     - Print the node tree as JSON
//!   tracwiki render `<path>` [--escape-newlines]    - Parse and re-render as wikitext
//!   tracwiki normalize `<link>`                     - Print the canonical link form

use std::fs;
use std::io::Read;

use clap::{Arg, ArgAction, Command};

use tracwiki::{normalize_link, tree_to_wikitext, wikitext_to_tree, Options};

fn main() {
    let matches = Command::new("tracwiki")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A converter between Trac wikitext and a JSON node tree")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("parse")
                .about("Parse wikitext and print the node tree as JSON")
                .arg(
                    Arg::new("path")
                        .help("Path to the wikitext file, or '-' for stdin")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("escape-newlines")
                        .long("escape-newlines")
                        .help("Treat newlines inside paragraphs as hard line breaks")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("render")
                .about("Parse wikitext and re-render it as canonical wikitext")
                .arg(
                    Arg::new("path")
                        .help("Path to the wikitext file, or '-' for stdin")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("escape-newlines")
                        .long("escape-newlines")
                        .help("Treat newlines inside paragraphs as hard line breaks")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("normalize")
                .about("Print the canonical scheme:target form of a link")
                .arg(
                    Arg::new("link")
                        .help("Raw link target or label")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("parse", sub)) => {
            let path = sub.get_one::<String>("path").expect("path is required");
            let options = Options {
                escape_newlines: sub.get_flag("escape-newlines"),
                ..Options::default()
            };
            handle_parse_command(path, &options);
        }
        Some(("render", sub)) => {
            let path = sub.get_one::<String>("path").expect("path is required");
            let options = Options {
                escape_newlines: sub.get_flag("escape-newlines"),
                ..Options::default()
            };
            handle_render_command(path, &options);
        }
        Some(("normalize", sub)) => {
            let link = sub.get_one::<String>("link").expect("link is required");
            handle_normalize_command(link);
        }
        _ => unreachable!(),
    }
}

fn read_source(path: &str) -> String {
    if path == "-" {
        let mut source = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut source) {
            eprintln!("Error reading stdin: {e}");
            std::process::exit(1);
        }
        return source;
    }
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            std::process::exit(1);
        }
    }
}

/// Handle the parse command
fn handle_parse_command(path: &str, options: &Options) {
    let tree = wikitext_to_tree(&read_source(path), options);
    match serde_json::to_string_pretty(&tree) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing tree: {e}");
            std::process::exit(1);
        }
    }
}

/// Handle the render command
fn handle_render_command(path: &str, options: &Options) {
    let tree = wikitext_to_tree(&read_source(path), options);
    match tree_to_wikitext(&tree, options) {
        Ok(wikitext) => print!("{wikitext}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Handle the normalize command
fn handle_normalize_command(link: &str) {
    match normalize_link(link) {
        Ok(canonical) => println!("{canonical}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
