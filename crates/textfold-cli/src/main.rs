//! Command-line front end for `textfold-core`
//!
//! # Usage
//!
//! ```bash
//! # Fold regions of a file (1-based lines)
//! cargo run -p textfold-cli -- outline src/main.c
//! cargo run -p textfold-cli -- outline --json data.json
//!
//! # Print a file with some regions collapsed
//! cargo run -p textfold-cli -- render src/main.c --collapse 12 --collapse 40
//! cargo run -p textfold-cli -- render src/main.c --collapse-all --line-numbers
//!
//! # Regex search over files
//! cargo run -p textfold-cli -- search -i 'todo' src/*.rs
//! ```
//!
//! The language is chosen by file extension; `--language config.json` loads a custom one.
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use textfold_core::FoldedDocument;
use textfold_core_lang::LanguageConfig;
use textfold_core_markers::CombinedMarkers;
use textfold_core_search::{DiskSearch, DiskSearchOptions, SearchMessage};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "textfold")]
#[command(about = "Code folding outlines and disk search")]
#[command(version)]
struct Cli {
    /// Language configuration (JSON) to use instead of the built-in one for the extension
    #[arg(long, global = true, value_name = "FILE")]
    language: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fold regions of a file
    Outline {
        /// File to analyze
        file: PathBuf,
        /// Print JSON instead of an indented list
        #[arg(long)]
        json: bool,
    },
    /// Print a file with regions collapsed
    Render {
        /// File to print
        file: PathBuf,
        /// Collapse the region opening on this (1-based) line; repeatable
        #[arg(long, value_name = "LINE")]
        collapse: Vec<usize>,
        /// Collapse every region
        #[arg(long)]
        collapse_all: bool,
        /// Prefix lines with their real line number
        #[arg(long)]
        line_numbers: bool,
    },
    /// Search files for a regular expression
    Search {
        /// Pattern; include `\n` to match across lines
        pattern: String,
        /// Files to search
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Case-insensitive matching
        #[arg(short, long)]
        ignore_case: bool,
        /// Also search files that look binary
        #[arg(long)]
        include_binary: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Outline { file, json } => {
            let doc = open_document(&file, cli.language.as_deref())?;
            if json {
                println!("{}", outline_json(&doc)?);
            } else {
                print!("{}", outline_text(&doc));
            }
        }
        Command::Render {
            file,
            collapse,
            collapse_all,
            line_numbers,
        } => {
            let mut doc = open_document(&file, cli.language.as_deref())?;
            if collapse_all {
                doc.tree_mut().collapse_all();
            }
            for line in collapse {
                let Some(line) = line.checked_sub(1) else {
                    bail!("line numbers start at 1");
                };
                if !doc.tree_mut().collapse_region(line) {
                    tracing::warn!(line = line + 1, "cli.render.no_region");
                }
            }
            print!("{}", render(&doc, line_numbers));
        }
        Command::Search {
            pattern,
            files,
            ignore_case,
            include_binary,
        } => {
            let options = DiskSearchOptions {
                case_sensitive: !ignore_case,
                include_binary,
                ..DiskSearchOptions::default()
            };
            let found = run_search(files, &pattern, options)?;
            if found == 0 {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn load_language(file: &Path, language: Option<&Path>) -> Result<LanguageConfig> {
    match language {
        Some(path) => LanguageConfig::from_json_file(path)
            .with_context(|| format!("loading language config {}", path.display())),
        None => Ok(LanguageConfig::for_path(file)),
    }
}

fn open_document(file: &Path, language: Option<&Path>) -> Result<FoldedDocument<CombinedMarkers>> {
    let config = load_language(file, language)?;
    let markers = CombinedMarkers::new(&config)
        .with_context(|| format!("building markers for language {:?}", config.name))?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let doc = FoldedDocument::new(&text, markers);
    tracing::trace!(dump = %doc.tree().dump(), "cli.tree");
    Ok(doc)
}

fn kind_label(doc: &FoldedDocument<CombinedMarkers>, kind: textfold_core::RegionKind) -> String {
    doc.source()
        .label(kind)
        .map(str::to_string)
        .unwrap_or_else(|| kind.to_string())
}

fn outline_text(doc: &FoldedDocument<CombinedMarkers>) -> String {
    let mut out = String::new();
    for region in doc.tree().regions() {
        let end = match region.end_line {
            Some(end) => (end + 1).to_string(),
            None => "EOF".to_string(),
        };
        out.push_str(&format!(
            "{:indent$}{}-{} {}\n",
            "",
            region.start_line + 1,
            end,
            kind_label(doc, region.kind),
            indent = region.depth * 2
        ));
    }
    for (line, kind) in doc.tree().unmatched_closings() {
        out.push_str(&format!(
            "unmatched {} at {}\n",
            kind_label(doc, kind),
            line + 1
        ));
    }
    out
}

fn outline_json(doc: &FoldedDocument<CombinedMarkers>) -> Result<String> {
    let regions: Vec<_> = doc
        .tree()
        .regions()
        .into_iter()
        .map(|region| {
            json!({
                "start_line": region.start_line + 1,
                "end_line": region.end_line.map(|end| end + 1),
                "kind": kind_label(doc, region.kind),
                "depth": region.depth,
            })
        })
        .collect();
    let unmatched: Vec<_> = doc
        .tree()
        .unmatched_closings()
        .into_iter()
        .map(|(line, kind)| json!({ "line": line + 1, "kind": kind_label(doc, kind) }))
        .collect();
    Ok(serde_json::to_string_pretty(
        &json!({ "regions": regions, "unmatched": unmatched }),
    )?)
}

fn render(doc: &FoldedDocument<CombinedMarkers>, line_numbers: bool) -> String {
    let width = doc.line_count().to_string().len();
    let mut out = String::new();
    for (line, text) in doc.visible_lines() {
        if line_numbers {
            out.push_str(&format!("{:>width$} ", line + 1));
        }
        out.push_str(&text);
        if doc.tree().line_info(line).starts_invisible_block {
            let hidden = doc
                .tree()
                .hidden_blocks()
                .iter()
                .find(|block| block.start == line + 1)
                .map_or(0, |block| block.length);
            out.push_str(&format!(" ... ({hidden} lines)"));
        }
        out.push('\n');
    }
    out
}

fn run_search(files: Vec<PathBuf>, pattern: &str, options: DiskSearchOptions) -> Result<usize> {
    let handle = DiskSearch::start(files, pattern, options)
        .with_context(|| format!("starting search for {pattern:?}"))?;

    let mut found = 0;
    for message in handle.iter() {
        match message {
            SearchMessage::Searching(path) => {
                tracing::debug!(path = %path.display(), "cli.search.file");
            }
            SearchMessage::Matches { path, matches } => {
                for m in &matches {
                    println!(
                        "{}:{}:{}: {}",
                        path.display(),
                        m.start_line + 1,
                        m.start_column + 1,
                        m.line_text
                    );
                }
                found += matches.len();
            }
            SearchMessage::Done => break,
        }
    }
    Ok(found)
}
