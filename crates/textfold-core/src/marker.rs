//! Region markers
//!
//! A highlighter reports, for every line, the folding region boundaries it saw on that line.
//! Each boundary is a [`RegionMarker`]: an opening or closing marker of some [`RegionKind`].
//!
//! The compact wire form used by highlighters is a signed byte: a positive value opens a region
//! of that kind, the negated value closes it, and `0` is reserved.

use crate::error::FoldingError;
use std::fmt;
use std::num::NonZeroU8;

/// Identifies a kind of foldable region (braces, brackets, `BEGIN`/`END` comments, ...).
///
/// Valid kinds are `1..=127` so that every kind has a signed closing counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionKind(NonZeroU8);

impl RegionKind {
    /// Largest representable region kind.
    pub const MAX: u8 = i8::MAX as u8;

    /// Create a region kind, returning `None` for `0` or values above [`RegionKind::MAX`].
    pub const fn new(raw: u8) -> Option<Self> {
        if raw > Self::MAX {
            return None;
        }
        match NonZeroU8::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// The numeric kind.
    pub const fn get(self) -> u8 {
        self.0.get()
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// A single region boundary reported on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionMarker {
    /// Opens a region of the given kind.
    Open(RegionKind),
    /// Closes a region of the given kind.
    Close(RegionKind),
}

impl RegionMarker {
    /// Decode the signed highlighter encoding.
    pub fn from_raw(raw: i8) -> Result<Self, FoldingError> {
        let kind = RegionKind::new(raw.unsigned_abs()).ok_or(FoldingError::InvalidMarker(raw))?;
        Ok(if raw > 0 {
            Self::Open(kind)
        } else {
            Self::Close(kind)
        })
    }

    /// Encode into the signed highlighter encoding.
    pub fn raw(self) -> i8 {
        match self {
            // `RegionKind` is at most `i8::MAX`, so these casts are lossless.
            Self::Open(kind) => kind.get() as i8,
            Self::Close(kind) => -(kind.get() as i8),
        }
    }

    /// The region kind this marker refers to.
    pub fn kind(self) -> RegionKind {
        match self {
            Self::Open(kind) | Self::Close(kind) => kind,
        }
    }

    /// Returns `true` for opening markers.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Decode a whole line of signed markers.
pub fn markers_from_raw(raw: &[i8]) -> Result<Vec<RegionMarker>, FoldingError> {
    raw.iter().copied().map(RegionMarker::from_raw).collect()
}

/// Cancel regions that open and close on the same line.
///
/// `markers` are in textual (left-to-right) order. An opening marker immediately followed by the
/// matching closing marker contributes no foldable range, and removing such a pair may expose
/// another adjacent pair, so `{ { } }` and `{}{}` both simplify to nothing while `} {` is kept.
pub fn simplify_markers(markers: &[RegionMarker]) -> Vec<RegionMarker> {
    let mut out: Vec<RegionMarker> = Vec::with_capacity(markers.len());
    for &marker in markers {
        match (marker, out.last()) {
            (RegionMarker::Close(kind), Some(&RegionMarker::Open(open))) if open == kind => {
                out.pop();
            }
            _ => out.push(marker),
        }
    }
    out
}

/// Produces region markers for the lines of a document.
///
/// This is the seam between the folding tree and whatever highlighter the host uses.
pub trait RegionMarkerSource {
    /// Return the markers found on `text` (a single line without its line terminator),
    /// in textual order.
    fn markers_for_line(&mut self, line: usize, text: &str) -> Vec<RegionMarker>;
}

impl<F> RegionMarkerSource for F
where
    F: FnMut(usize, &str) -> Vec<RegionMarker>,
{
    fn markers_for_line(&mut self, line: usize, text: &str) -> Vec<RegionMarker> {
        self(line, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(k: u8) -> RegionMarker {
        RegionMarker::Open(RegionKind::new(k).unwrap())
    }

    fn close(k: u8) -> RegionMarker {
        RegionMarker::Close(RegionKind::new(k).unwrap())
    }

    #[test]
    fn test_region_kind_bounds() {
        assert!(RegionKind::new(0).is_none());
        assert!(RegionKind::new(128).is_none());
        assert_eq!(RegionKind::new(127).map(RegionKind::get), Some(127));
    }

    #[test]
    fn test_raw_encoding() {
        assert_eq!(RegionMarker::from_raw(3).unwrap(), open(3));
        assert_eq!(RegionMarker::from_raw(-3).unwrap(), close(3));
        assert_eq!(close(3).raw(), -3);
        assert_eq!(
            RegionMarker::from_raw(0),
            Err(FoldingError::InvalidMarker(0))
        );
        assert_eq!(
            RegionMarker::from_raw(i8::MIN),
            Err(FoldingError::InvalidMarker(i8::MIN))
        );
    }

    #[test]
    fn test_simplify_nested_same_line_pairs() {
        assert!(simplify_markers(&[open(1), open(1), close(1), close(1)]).is_empty());
        assert!(simplify_markers(&[open(1), close(1), open(1), close(1)]).is_empty());
    }

    #[test]
    fn test_simplify_keeps_close_then_open() {
        assert_eq!(
            simplify_markers(&[close(1), open(1)]),
            vec![close(1), open(1)]
        );
    }

    #[test]
    fn test_simplify_keeps_mismatched_kinds() {
        assert_eq!(
            simplify_markers(&[open(1), close(2)]),
            vec![open(1), close(2)]
        );
        assert_eq!(
            simplify_markers(&[open(1), open(2), close(2)]),
            vec![open(1)]
        );
    }
}
