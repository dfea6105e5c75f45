//! `textfold-core-markers` - region-marker producers for `textfold-core`.
//!
//! These are lightweight, line-local scanners: they look at one line at a time and report the
//! folding region boundaries on it. They do not track state across lines, so a block comment
//! spanning several lines is not recognized as a comment.
//!
//! Kinds are assigned from a [`LanguageConfig`]: bracket pair `i` is kind `i + 1`, and region
//! comment rule `j` continues after the brackets.

use regex::Regex;
use textfold_core::{RegionKind, RegionMarker, RegionMarkerSource};
use textfold_core_lang::{LanguageConfig, LanguageConfigError};
use thiserror::Error;

#[derive(Debug, Error)]
/// Errors produced while building marker producers.
pub enum MarkerError {
    #[error("invalid region marker pattern {pattern:?}: {source}")]
    /// A region comment pattern failed to compile.
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compile error.
        source: regex::Error,
    },

    #[error(transparent)]
    /// The language configuration is invalid.
    Config(#[from] LanguageConfigError),
}

/// A marker found on a line, with the byte column it starts at.
pub type PositionedMarker = (usize, RegionMarker);

fn kind_at(index: usize) -> Result<RegionKind, MarkerError> {
    u8::try_from(index + 1)
        .ok()
        .and_then(RegionKind::new)
        .ok_or_else(|| {
            MarkerError::Config(LanguageConfigError::TooManyKinds { count: index + 1 })
        })
}

#[derive(Debug, Clone)]
struct BracketRule {
    open: String,
    close: String,
    kind: RegionKind,
}

/// Reports configured bracket pairs, skipping comments and string literals.
#[derive(Debug, Clone)]
pub struct BracketMarkers {
    rules: Vec<BracketRule>,
    line_comment: Option<String>,
    block_comment: Option<(String, String)>,
    quotes: Vec<char>,
}

impl BracketMarkers {
    /// Build from the brackets, comment tokens and quotes of `config`.
    pub fn new(config: &LanguageConfig) -> Result<Self, MarkerError> {
        config.validate()?;
        let rules = config
            .brackets
            .iter()
            .enumerate()
            .map(|(index, pair)| {
                Ok(BracketRule {
                    open: pair.open.clone(),
                    close: pair.close.clone(),
                    kind: kind_at(index)?,
                })
            })
            .collect::<Result<Vec<_>, MarkerError>>()?;

        let comments = &config.comments;
        let block_comment = match (&comments.block_start, &comments.block_end) {
            (Some(start), Some(end)) if comments.has_block() => Some((start.clone(), end.clone())),
            _ => None,
        };

        Ok(Self {
            rules,
            line_comment: comments.line.clone().filter(|token| !token.is_empty()),
            block_comment,
            quotes: config.string_quotes.clone(),
        })
    }

    /// Bracket markers of `text`, in textual order.
    pub fn scan(&self, text: &str) -> Vec<PositionedMarker> {
        let mut out = Vec::new();
        let mut in_string: Option<char> = None;
        let mut i = 0;

        while let Some(ch) = text[i..].chars().next() {
            let rest = &text[i..];

            if let Some(quote) = in_string {
                if ch == '\\' {
                    // Skip the escaped character as well.
                    i += ch.len_utf8();
                    if let Some(escaped) = text[i..].chars().next() {
                        i += escaped.len_utf8();
                    }
                    continue;
                }
                if ch == quote {
                    in_string = None;
                }
                i += ch.len_utf8();
                continue;
            }

            if self
                .line_comment
                .as_deref()
                .is_some_and(|token| rest.starts_with(token))
            {
                break;
            }
            if let Some((start, end)) = &self.block_comment {
                if rest.starts_with(start.as_str()) {
                    let body = &rest[start.len()..];
                    match body.find(end.as_str()) {
                        Some(pos) => {
                            i += start.len() + pos + end.len();
                            continue;
                        }
                        None => break,
                    }
                }
            }
            if self.quotes.contains(&ch) {
                in_string = Some(ch);
                i += ch.len_utf8();
                continue;
            }

            if let Some((len, marker)) = self.bracket_at(rest) {
                out.push((i, marker));
                i += len;
                continue;
            }
            i += ch.len_utf8();
        }
        out
    }

    fn bracket_at(&self, rest: &str) -> Option<(usize, RegionMarker)> {
        self.rules.iter().find_map(|rule| {
            if rest.starts_with(rule.open.as_str()) {
                Some((rule.open.len(), RegionMarker::Open(rule.kind)))
            } else if rest.starts_with(rule.close.as_str()) {
                Some((rule.close.len(), RegionMarker::Close(rule.kind)))
            } else {
                None
            }
        })
    }
}

impl RegionMarkerSource for BracketMarkers {
    fn markers_for_line(&mut self, _line: usize, text: &str) -> Vec<RegionMarker> {
        self.scan(text).into_iter().map(|(_, marker)| marker).collect()
    }
}

#[derive(Debug, Clone)]
struct CommentRule {
    begin: Regex,
    end: Regex,
    kind: RegionKind,
}

/// Reports `BEGIN`/`END` style region comments matched by regular expressions.
#[derive(Debug, Clone)]
pub struct CommentRegionMarkers {
    rules: Vec<CommentRule>,
}

impl CommentRegionMarkers {
    /// Build from the region marker rules of `config`.
    pub fn new(config: &LanguageConfig) -> Result<Self, MarkerError> {
        config.validate()?;
        let first = config.brackets.len();
        let rules = config
            .region_markers
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                Ok(CommentRule {
                    begin: compile(&rule.begin)?,
                    end: compile(&rule.end)?,
                    kind: kind_at(first + index)?,
                })
            })
            .collect::<Result<Vec<_>, MarkerError>>()?;
        Ok(Self { rules })
    }

    /// Region comment markers of `text`, in textual order.
    pub fn scan(&self, text: &str) -> Vec<PositionedMarker> {
        let mut out = Vec::new();
        for rule in &self.rules {
            out.extend(
                rule.begin
                    .find_iter(text)
                    .map(|m| (m.start(), RegionMarker::Open(rule.kind))),
            );
            out.extend(
                rule.end
                    .find_iter(text)
                    .map(|m| (m.start(), RegionMarker::Close(rule.kind))),
            );
        }
        out.sort_by_key(|&(column, _)| column);
        out
    }
}

fn compile(pattern: &str) -> Result<Regex, MarkerError> {
    Regex::new(pattern).map_err(|source| MarkerError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl RegionMarkerSource for CommentRegionMarkers {
    fn markers_for_line(&mut self, _line: usize, text: &str) -> Vec<RegionMarker> {
        self.scan(text).into_iter().map(|(_, marker)| marker).collect()
    }
}

/// Brackets and region comments of one language, merged by column.
#[derive(Debug, Clone)]
pub struct CombinedMarkers {
    brackets: BracketMarkers,
    comments: CommentRegionMarkers,
    labels: Vec<String>,
}

impl CombinedMarkers {
    /// Build both producers from `config`.
    pub fn new(config: &LanguageConfig) -> Result<Self, MarkerError> {
        let brackets = BracketMarkers::new(config)?;
        let comments = CommentRegionMarkers::new(config)?;
        let labels = config
            .brackets
            .iter()
            .map(|pair| format!("{}{}", pair.open, pair.close))
            .chain(config.region_markers.iter().map(|rule| rule.begin.clone()))
            .collect::<Vec<_>>();
        tracing::debug!(
            language = %config.name,
            kinds = labels.len(),
            "markers.build"
        );
        Ok(Self {
            brackets,
            comments,
            labels,
        })
    }

    /// Human readable label of a kind: the bracket pair, or the opening pattern of a region rule.
    pub fn label(&self, kind: RegionKind) -> Option<&str> {
        self.labels
            .get(usize::from(kind.get()) - 1)
            .map(String::as_str)
    }

    /// All markers of `text`, in textual order.
    pub fn scan(&self, text: &str) -> Vec<PositionedMarker> {
        let mut out = self.brackets.scan(text);
        out.extend(self.comments.scan(text));
        out.sort_by_key(|&(column, _)| column);
        out
    }
}

impl RegionMarkerSource for CombinedMarkers {
    fn markers_for_line(&mut self, _line: usize, text: &str) -> Vec<RegionMarker> {
        self.scan(text).into_iter().map(|(_, marker)| marker).collect()
    }
}
