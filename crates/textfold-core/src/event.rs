//! Change notifications emitted by the folding tree.

/// A change the rendering layer may need to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldingEvent {
    /// The region structure changed while processing `line`.
    StructureChanged {
        /// Line whose update changed the structure.
        line: usize,
    },
    /// The region opening at `line` was collapsed or expanded.
    RegionVisibilityChanged {
        /// Header line of the region.
        line: usize,
    },
    /// Real lines `start..=end` were shown or hidden.
    LinesVisibilityChanged {
        /// First affected real line.
        start: usize,
        /// Last affected real line (inclusive).
        end: usize,
        /// New visibility.
        visible: bool,
    },
}

/// Folding event callback function type.
pub type FoldingEventCallback = Box<dyn FnMut(&FoldingEvent) + Send>;
