use crate::node::NodeId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors produced by the folding tree.
///
/// Apart from [`FoldingError::InvalidMarker`], these describe structural corruption reported by
/// [`crate::FoldingTree::check_invariants`]; mismatched region markers are never errors.
pub enum FoldingError {
    #[error("invalid region marker value {0}")]
    /// A signed marker was `0` or out of range.
    InvalidMarker(i8),

    #[error("node {node} points to parent {found:?}, expected {expected}")]
    /// A child's parent link does not point back to the node listing it.
    BrokenParentLink {
        /// The child node.
        node: NodeId,
        /// The node that lists it as a child.
        expected: NodeId,
        /// The parent link actually stored.
        found: Option<NodeId>,
    },

    #[error("children of node {node} are not ordered by start line")]
    /// Child nodes are out of order.
    UnsortedChildren {
        /// The parent node.
        node: NodeId,
    },

    #[error("region starting at line {start} ends after its parent closes at line {parent_end}")]
    /// A child extends past the end of its closed parent.
    EscapesParent {
        /// Absolute start line of the child.
        start: usize,
        /// Absolute end line of the parent.
        parent_end: usize,
    },

    #[error("unmatched closing marker at line {line} is malformed")]
    /// An unmatched closing node has children, a valid start, or a non-zero extent.
    MalformedUnmatched {
        /// Absolute line of the marker.
        line: usize,
    },

    #[error("closed region at line {line} contains an unterminated region")]
    /// An unterminated region is nested inside a closed one.
    UnterminatedInsideClosed {
        /// Absolute start line of the closed region.
        line: usize,
    },

    #[error("{count} folding nodes are not reachable from the root")]
    /// Live nodes that are not part of the tree.
    Orphans {
        /// Number of unreachable nodes.
        count: usize,
    },

    #[error("collapsed region at line {line} has lines that are still displayed")]
    /// A collapsed region's body is not covered by hidden line blocks.
    CollapsedRegionShown {
        /// Absolute start line of the region.
        line: usize,
    },

    #[error("hidden line blocks overlap or are unordered at line {line}")]
    /// The hidden line block list is not sorted and disjoint.
    OverlappingHiddenBlocks {
        /// Start line of the offending block.
        line: usize,
    },
}
