//! Hidden line blocks
//!
//! Runs of real lines currently suppressed from display because a fold is collapsed.

use std::cell::Cell;

/// A contiguous run of hidden real lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HiddenLineBlock {
    /// First hidden real line (the line after the fold header).
    pub start: usize,
    /// Number of hidden lines.
    pub length: usize,
}

impl HiddenLineBlock {
    /// Create a block covering `length` lines starting at `start`.
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    /// One past the last hidden line.
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Check if `line` is hidden by this block.
    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line < self.end()
    }
}

/// Ordered, non-overlapping hidden line blocks with a memoized total.
#[derive(Debug, Default)]
pub struct HiddenLineBlocks {
    blocks: Vec<HiddenLineBlock>,
    count_cache: Cell<Option<usize>>,
}

impl HiddenLineBlocks {
    /// Create an empty block list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks ordered by start line.
    pub fn as_slice(&self) -> &[HiddenLineBlock] {
        &self.blocks
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if no lines are hidden.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub(crate) fn invalidate_count(&self) {
        self.count_cache.set(None);
    }

    /// Total number of hidden lines.
    pub fn hidden_lines_count(&self) -> usize {
        if let Some(count) = self.count_cache.get() {
            return count;
        }
        let count = self.blocks.iter().map(|b| b.length).sum();
        self.count_cache.set(Some(count));
        count
    }

    /// Register a block.
    ///
    /// Existing blocks that start inside the new one are absorbed. A block already enclosed by
    /// an existing one (or an empty block) is ignored and `false` is returned.
    pub fn insert(&mut self, block: HiddenLineBlock) -> bool {
        if block.length == 0 {
            return false;
        }
        if self
            .block_containing(block.start)
            .is_some_and(|existing| block.end() <= existing.end())
        {
            return false;
        }

        self.blocks
            .retain(|existing| !(existing.start >= block.start && existing.start < block.end()));
        let pos = self.blocks.partition_point(|b| b.start < block.start);
        self.blocks.insert(pos, block);
        self.invalidate_count();
        true
    }

    /// Remove the block starting exactly at `start`.
    pub fn remove_starting_at(&mut self, start: usize) -> Option<HiddenLineBlock> {
        let idx = self.blocks.binary_search_by_key(&start, |b| b.start).ok()?;
        self.invalidate_count();
        Some(self.blocks.remove(idx))
    }

    /// Remove all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.invalidate_count();
    }

    /// Find the block hiding `line`.
    pub fn block_containing(&self, line: usize) -> Option<&HiddenLineBlock> {
        let idx = self.blocks.partition_point(|b| b.start <= line);
        let candidate = self.blocks.get(idx.checked_sub(1)?)?;
        candidate.contains(line).then_some(candidate)
    }

    /// Check if `line` is hidden.
    pub fn is_hidden(&self, line: usize) -> bool {
        self.block_containing(line).is_some()
    }

    /// Adjust for a line inserted at `line`.
    ///
    /// Blocks after the line move down; a block the line lands in grows.
    pub fn shift_for_insert(&mut self, line: usize) {
        for block in &mut self.blocks {
            if block.start > line {
                block.start += 1;
            } else if block.end() > line {
                block.length += 1;
            }
        }
        self.invalidate_count();
    }

    /// Adjust for the removal of `line`.
    ///
    /// Blocks after the line move up; a block containing the line shrinks and disappears once
    /// empty.
    pub fn shift_for_remove(&mut self, line: usize) {
        for block in &mut self.blocks {
            if block.start > line {
                block.start -= 1;
            } else if block.end() > line {
                block.length -= 1;
            }
        }
        self.blocks.retain(|b| b.length > 0);
        self.invalidate_count();
    }

    /// Translate a real line to a virtual line.
    ///
    /// A hidden line maps to the virtual line of the fold header that hides it.
    pub fn real_to_virtual(&self, real: usize) -> usize {
        let mut hidden_before = 0usize;
        for block in &self.blocks {
            if block.end() <= real {
                hidden_before += block.length;
            } else if block.start <= real {
                return block.start.saturating_sub(1).saturating_sub(hidden_before);
            } else {
                break;
            }
        }
        real - hidden_before
    }

    /// Translate a virtual line to a real line.
    pub fn virtual_to_real(&self, virtual_line: usize) -> usize {
        let mut real = virtual_line;
        for block in &self.blocks {
            if block.start <= real {
                real += block.length;
            } else {
                break;
            }
        }
        real
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_keeps_order_and_absorbs_enclosed() {
        let mut blocks = HiddenLineBlocks::new();
        assert!(blocks.insert(HiddenLineBlock::new(10, 2)));
        assert!(blocks.insert(HiddenLineBlock::new(3, 2)));
        assert!(blocks.insert(HiddenLineBlock::new(20, 1)));
        assert_eq!(
            blocks.as_slice(),
            &[
                HiddenLineBlock::new(3, 2),
                HiddenLineBlock::new(10, 2),
                HiddenLineBlock::new(20, 1)
            ]
        );

        // An outer fold swallows the blocks of the folds nested inside it.
        assert!(blocks.insert(HiddenLineBlock::new(2, 12)));
        assert_eq!(
            blocks.as_slice(),
            &[HiddenLineBlock::new(2, 12), HiddenLineBlock::new(20, 1)]
        );
        assert_eq!(blocks.hidden_lines_count(), 13);
    }

    #[test]
    fn test_insert_ignores_enclosed_and_empty_blocks() {
        let mut blocks = HiddenLineBlocks::new();
        assert!(blocks.insert(HiddenLineBlock::new(2, 10)));
        assert!(!blocks.insert(HiddenLineBlock::new(4, 3)));
        assert!(!blocks.insert(HiddenLineBlock::new(30, 0)));
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_count_cache_invalidation() {
        let mut blocks = HiddenLineBlocks::new();
        blocks.insert(HiddenLineBlock::new(1, 5));
        assert_eq!(blocks.hidden_lines_count(), 5);
        blocks.shift_for_insert(3);
        assert_eq!(blocks.hidden_lines_count(), 6);
        blocks.remove_starting_at(1);
        assert_eq!(blocks.hidden_lines_count(), 0);
    }

    #[test]
    fn test_shift_insert_then_remove_is_identity() {
        let mut blocks = HiddenLineBlocks::new();
        blocks.insert(HiddenLineBlock::new(2, 3));
        blocks.insert(HiddenLineBlock::new(10, 4));
        let before = blocks.as_slice().to_vec();

        for line in [0, 2, 4, 5, 11, 14, 40] {
            blocks.shift_for_insert(line);
            blocks.shift_for_remove(line);
            assert_eq!(blocks.as_slice(), before.as_slice(), "line {line}");
        }
    }

    #[test]
    fn test_shift_remove_drops_empty_block() {
        let mut blocks = HiddenLineBlocks::new();
        blocks.insert(HiddenLineBlock::new(4, 1));
        blocks.shift_for_remove(4);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_line_translation() {
        let mut blocks = HiddenLineBlocks::new();
        blocks.insert(HiddenLineBlock::new(1, 5));
        blocks.insert(HiddenLineBlock::new(10, 2));

        assert_eq!(blocks.real_to_virtual(0), 0);
        assert_eq!(blocks.real_to_virtual(6), 1);
        assert_eq!(blocks.real_to_virtual(9), 4);
        assert_eq!(blocks.real_to_virtual(12), 5);
        // Hidden lines collapse onto their header.
        assert_eq!(blocks.real_to_virtual(3), 0);
        assert_eq!(blocks.real_to_virtual(11), 4);

        for real in [0, 6, 7, 8, 9, 12, 13, 50] {
            assert_eq!(blocks.virtual_to_real(blocks.real_to_virtual(real)), real);
        }
    }
}
