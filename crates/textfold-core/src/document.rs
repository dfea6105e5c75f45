//! Document with folding
//!
//! [`FoldedDocument`] owns the text (a [`ropey::Rope`]), a [`RegionMarkerSource`] and a
//! [`FoldingTree`], and forwards every edit to the tree as line insertions, line removals and
//! line updates.

use crate::marker::RegionMarkerSource;
use crate::tree::FoldingTree;
use ropey::Rope;

/// A text buffer whose folding regions follow its edits.
pub struct FoldedDocument<S> {
    rope: Rope,
    tree: FoldingTree,
    source: S,
}

impl<S: RegionMarkerSource> FoldedDocument<S> {
    /// Build a document and compute its regions.
    pub fn new(text: &str, source: S) -> Self {
        let mut document = Self {
            rope: Rope::from_str(text),
            tree: FoldingTree::new(),
            source,
        };
        document.reprocess_all();
        document
    }

    /// Feed every line to the tree again.
    pub fn reprocess_all(&mut self) {
        let lines = self.line_count();
        for line in 0..lines {
            self.process_line(line, true);
        }
        tracing::debug!(lines, regions = self.tree.region_count(), "fold.document.reprocess");
    }

    fn process_line(&mut self, line: usize, changed: bool) -> bool {
        let Some(text) = self.line_text(line) else {
            return false;
        };
        let markers = self.source.markers_for_line(line, &text);
        self.tree.update_line(line, &markers, changed)
    }

    /// Number of lines (a trailing newline starts an empty last line).
    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Text of `line` without its line terminator.
    pub fn line_text(&self, line: usize) -> Option<String> {
        let mut text = self.rope.get_line(line)?.to_string();
        if text.ends_with('\n') {
            text.pop();
        }
        if text.ends_with('\r') {
            text.pop();
        }
        Some(text)
    }

    /// The whole text.
    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    /// Insert `text` at a character offset (clamped to the end of the document).
    pub fn insert(&mut self, char_offset: usize, text: &str) {
        let offset = char_offset.min(self.rope.len_chars());
        let start_line = self.rope.char_to_line(offset);
        let before = self.rope.len_lines();
        self.rope.insert(offset, text);
        let added = self.rope.len_lines() - before;

        for _ in 0..added {
            self.tree.line_inserted(start_line + 1);
        }
        for line in start_line..=start_line + added {
            self.process_line(line, true);
        }
        self.refresh_neighbours(start_line, start_line + added);
    }

    /// Delete `len_chars` characters starting at a character offset.
    pub fn delete(&mut self, start_char: usize, len_chars: usize) {
        let start = start_char.min(self.rope.len_chars());
        let end = start.saturating_add(len_chars).min(self.rope.len_chars());
        if start >= end {
            return;
        }

        let start_line = self.rope.char_to_line(start);
        let before = self.rope.len_lines();
        self.rope.remove(start..end);
        let removed = before - self.rope.len_lines();

        for _ in 0..removed {
            self.tree.line_removed(start_line + 1);
        }
        self.process_line(start_line, true);
        self.refresh_neighbours(start_line, start_line);
    }

    /// Reprocess the lines around an edit if line shifts flagged them.
    fn refresh_neighbours(&mut self, first: usize, last: usize) {
        if let Some(prev) = first.checked_sub(1) {
            self.process_line(prev, false);
        }
        self.process_line(last + 1, false);
    }

    /// Collapse or expand the region opening at `line`.
    pub fn toggle_fold(&mut self, line: usize) -> bool {
        self.tree.toggle_region_visibility(line)
    }

    /// Displayed lines as `(real line, text)` pairs.
    pub fn visible_lines(&self) -> Vec<(usize, String)> {
        (0..self.line_count())
            .filter(|&line| self.tree.is_line_visible(line))
            .filter_map(|line| self.line_text(line).map(|text| (line, text)))
            .collect()
    }

    /// The folding tree.
    pub fn tree(&self) -> &FoldingTree {
        &self.tree
    }

    /// Mutable access to the folding tree (for visibility changes).
    pub fn tree_mut(&mut self) -> &mut FoldingTree {
        &mut self.tree
    }

    /// The marker source.
    pub fn source(&self) -> &S {
        &self.source
    }
}
