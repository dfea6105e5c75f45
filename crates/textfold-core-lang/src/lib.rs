#![warn(missing_docs)]
//! `textfold-core-lang` - data-driven language configuration for `textfold-core`.
//!
//! This crate stays lightweight and does **not** depend on any highlighting system. It describes,
//! per language, the tokens a folding-marker producer needs: comment tokens, bracket pairs,
//! string quotes and `BEGIN`/`END` style region comments. Configurations can be built in code
//! or loaded from JSON.
//!
//! ```rust
//! use textfold_core_lang::LanguageConfig;
//!
//! let config = LanguageConfig::from_json_str(r#"{
//!     "name": "ini",
//!     "extensions": ["ini"],
//!     "comments": { "line": ";" },
//!     "region_markers": [{ "begin": ";\\s*BEGIN", "end": ";\\s*END" }]
//! }"#).unwrap();
//!
//! assert!(config.comments.has_line());
//! assert!(config.brackets.is_empty());
//! assert_eq!(config.kind_count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Largest number of distinct region kinds a configuration may declare.
pub const MAX_REGION_KINDS: usize = 127;

/// Comment tokens/config for a given language.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentConfig {
    /// Line comment token (e.g. `//`, `#`).
    pub line: Option<String>,
    /// Block comment start token (e.g. `/*`).
    pub block_start: Option<String>,
    /// Block comment end token (e.g. `*/`).
    pub block_end: Option<String>,
}

impl CommentConfig {
    /// Create a config that supports only line comments.
    pub fn line(token: impl Into<String>) -> Self {
        Self {
            line: Some(token.into()),
            block_start: None,
            block_end: None,
        }
    }

    /// Create a config that supports both line and block comments.
    pub fn line_and_block(
        line: impl Into<String>,
        block_start: impl Into<String>,
        block_end: impl Into<String>,
    ) -> Self {
        Self {
            line: Some(line.into()),
            block_start: Some(block_start.into()),
            block_end: Some(block_end.into()),
        }
    }

    /// Returns `true` if a line comment token is configured.
    pub fn has_line(&self) -> bool {
        self.line.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Returns `true` if both block comment tokens are configured.
    pub fn has_block(&self) -> bool {
        self.block_start.as_deref().is_some_and(|s| !s.is_empty())
            && self.block_end.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A pair of single-line tokens delimiting a foldable region, e.g. `{` and `}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketPair {
    /// Opening token.
    pub open: String,
    /// Closing token.
    pub close: String,
}

impl BracketPair {
    /// Create a bracket pair.
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// A region delimited by comments matching regular expressions, e.g. `// BEGIN` / `// END`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMarkerRule {
    /// Pattern opening the region.
    pub begin: String,
    /// Pattern closing the region.
    pub end: String,
}

impl RegionMarkerRule {
    /// Create a rule from two regex patterns.
    pub fn new(begin: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
        }
    }
}

#[derive(Debug, Error)]
/// Errors produced while loading or validating a [`LanguageConfig`].
pub enum LanguageConfigError {
    #[error("failed to read language config: {0}")]
    /// I/O failure while reading a config file.
    Io(#[from] std::io::Error),

    #[error("invalid language config JSON: {0}")]
    /// The JSON is malformed or does not match the schema.
    Json(#[from] serde_json::Error),

    #[error("bracket pair {index} has an empty token")]
    /// A bracket pair declares an empty opening or closing token.
    EmptyBracket {
        /// Position of the pair in `brackets`.
        index: usize,
    },

    #[error("{count} region kinds declared, at most 127 are supported")]
    /// More bracket pairs and region rules than representable region kinds.
    TooManyKinds {
        /// Declared kind count.
        count: usize,
    },
}

/// Everything a folding-marker producer needs to know about a language.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Display name.
    pub name: String,
    /// File extensions (without the dot) this configuration applies to.
    pub extensions: Vec<String>,
    /// Comment tokens. Text after a line comment token produces no bracket markers.
    pub comments: CommentConfig,
    /// Bracket pairs, in kind order: the first pair is kind `1`.
    pub brackets: Vec<BracketPair>,
    /// Characters opening and closing string literals.
    pub string_quotes: Vec<char>,
    /// Region comment rules; kinds continue after the bracket pairs.
    pub region_markers: Vec<RegionMarkerRule>,
}

impl LanguageConfig {
    /// C-family languages: braces, brackets and parentheses, `//` comments, `BEGIN`/`END` and
    /// `{{{`/`}}}` region comments.
    pub fn c_like() -> Self {
        Self {
            name: "c-like".to_string(),
            extensions: ["c", "h", "cc", "cpp", "hpp", "rs", "js", "ts", "java", "go", "cs"]
                .into_iter()
                .map(String::from)
                .collect(),
            comments: CommentConfig::line_and_block("//", "/*", "*/"),
            brackets: vec![
                BracketPair::new("{", "}"),
                BracketPair::new("[", "]"),
                BracketPair::new("(", ")"),
            ],
            string_quotes: vec!['"', '\''],
            region_markers: vec![
                RegionMarkerRule::new(r"//\s*BEGIN\b", r"//\s*END\b"),
                RegionMarkerRule::new(r"\{\{\{", r"\}\}\}"),
            ],
        }
    }

    /// JSON: objects and arrays.
    pub fn json() -> Self {
        Self {
            name: "json".to_string(),
            extensions: vec!["json".to_string()],
            comments: CommentConfig::default(),
            brackets: vec![BracketPair::new("{", "}"), BracketPair::new("[", "]")],
            string_quotes: vec!['"'],
            region_markers: Vec::new(),
        }
    }

    /// Plain text: only `{{{`/`}}}` fold markers.
    pub fn plain() -> Self {
        Self {
            name: "plain".to_string(),
            region_markers: vec![RegionMarkerRule::new(r"\{\{\{", r"\}\}\}")],
            ..Self::default()
        }
    }

    /// The built-in configurations.
    pub fn builtins() -> Vec<Self> {
        vec![Self::c_like(), Self::json(), Self::plain()]
    }

    /// The built-in configuration for a file extension, falling back to [`LanguageConfig::plain`].
    pub fn for_extension(extension: &str) -> Self {
        Self::builtins()
            .into_iter()
            .find(|config| config.matches_extension(extension))
            .unwrap_or_else(Self::plain)
    }

    /// The built-in configuration for a path, by extension.
    pub fn for_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::for_extension)
            .unwrap_or_else(Self::plain)
    }

    /// Check whether `extension` (without the dot, case-insensitive) belongs to this language.
    pub fn matches_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    /// Number of region kinds this configuration declares.
    pub fn kind_count(&self) -> usize {
        self.brackets.len() + self.region_markers.len()
    }

    /// Check the configuration for structural problems.
    ///
    /// Regex syntax is checked by the marker producers that compile the patterns.
    pub fn validate(&self) -> Result<(), LanguageConfigError> {
        if let Some(index) = self
            .brackets
            .iter()
            .position(|pair| pair.open.is_empty() || pair.close.is_empty())
        {
            return Err(LanguageConfigError::EmptyBracket { index });
        }
        let count = self.kind_count();
        if count > MAX_REGION_KINDS {
            return Err(LanguageConfigError::TooManyKinds { count });
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, LanguageConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LanguageConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_string(&self) -> Result<String, LanguageConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
