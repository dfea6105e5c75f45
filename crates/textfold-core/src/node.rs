//! Folding nodes and the arena that owns them.
//!
//! Nodes refer to each other through [`NodeId`] indices into a [`NodeArena`]; a parent owns its
//! children (a node is freed together with, or after, detaching its subtree) and the parent link
//! is only used for upward traversal.

use crate::marker::RegionKind;
use std::fmt;
use std::ops::{Index, IndexMut};

/// End offset stored for regions whose closing line is not known yet.
pub const UNTERMINATED_END: usize = usize::MAX;

/// Index of a node inside a [`crate::FoldingTree`].
///
/// Slots are reused once a node is freed; the generation tells a stale id apart from the
/// node that took its slot, so lookups through a stale id fail instead of aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    slot: usize,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

/// What a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The tree root. Never a real region.
    Root,
    /// A region opened by a marker of `kind`, closed or still unterminated.
    Open {
        /// Region kind.
        kind: RegionKind,
    },
    /// A closing marker of `kind` that did not match the innermost open region.
    ///
    /// Surfaces as an invalid block end in line-info queries.
    Unmatched {
        /// Region kind of the closing marker.
        kind: RegionKind,
    },
}

impl NodeKind {
    /// The region kind, if this is not the root.
    pub fn region_kind(self) -> Option<RegionKind> {
        match self {
            Self::Root => None,
            Self::Open { kind } | Self::Unmatched { kind } => Some(kind),
        }
    }

    /// Signed encoding: positive for open regions, negative for unmatched closings, `0` for root.
    pub fn raw(self) -> i8 {
        match self {
            Self::Root => 0,
            Self::Open { kind } => kind.get() as i8,
            Self::Unmatched { kind } => -(kind.get() as i8),
        }
    }
}

/// One folding region, unmatched closing marker, or the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldingNode {
    pub(crate) kind: NodeKind,
    pub(crate) start_rel: usize,
    pub(crate) start_valid: bool,
    pub(crate) end_rel: usize,
    pub(crate) end_valid: bool,
    pub(crate) visible: bool,
    pub(crate) delete_opening: bool,
    pub(crate) delete_ending: bool,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
}

impl FoldingNode {
    pub(crate) fn root() -> Self {
        Self {
            kind: NodeKind::Root,
            start_rel: 0,
            start_valid: true,
            end_rel: UNTERMINATED_END,
            end_valid: false,
            visible: true,
            delete_opening: false,
            delete_ending: false,
            children: Vec::new(),
            parent: None,
        }
    }

    /// A freshly opened region with an unknown end.
    pub(crate) fn open(parent: NodeId, kind: RegionKind, start_rel: usize) -> Self {
        Self {
            kind: NodeKind::Open { kind },
            start_rel,
            start_valid: true,
            end_rel: UNTERMINATED_END,
            end_valid: false,
            visible: true,
            delete_opening: false,
            delete_ending: false,
            children: Vec::new(),
            parent: Some(parent),
        }
    }

    /// A closing marker with no matching opening.
    pub(crate) fn unmatched(parent: NodeId, kind: RegionKind, start_rel: usize) -> Self {
        Self {
            kind: NodeKind::Unmatched { kind },
            start_rel,
            start_valid: false,
            end_rel: 0,
            end_valid: true,
            visible: true,
            delete_opening: false,
            delete_ending: false,
            children: Vec::new(),
            parent: Some(parent),
        }
    }

    /// Node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Start line relative to the parent's start line.
    pub fn start_line_relative(&self) -> usize {
        self.start_rel
    }

    /// Whether the opening line is known.
    pub fn start_valid(&self) -> bool {
        self.start_valid
    }

    /// End line relative to this node's own start, or `None` while unterminated.
    pub fn end_line_relative(&self) -> Option<usize> {
        self.end_valid.then_some(self.end_rel)
    }

    /// Whether the closing line is known.
    pub fn end_valid(&self) -> bool {
        self.end_valid
    }

    /// `true` if expanded, `false` if collapsed.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Child nodes ordered by start line.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Parent node (`None` for the root).
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub(crate) fn is_open_region(&self) -> bool {
        matches!(self.kind, NodeKind::Open { .. })
    }

    /// Whether a node starting at `abs_start` spans `line`.
    ///
    /// The root and unterminated regions extend to the end of the document.
    pub(crate) fn spans(&self, abs_start: usize, line: usize) -> bool {
        if line < abs_start {
            return false;
        }
        match self.kind {
            NodeKind::Root => true,
            _ => !self.end_valid || line - abs_start <= self.end_rel,
        }
    }

    pub(crate) fn clear_marks(&mut self) {
        self.delete_opening = false;
        self.delete_ending = false;
    }

    pub(crate) fn set_unterminated(&mut self) {
        self.end_valid = false;
        self.end_rel = UNTERMINATED_END;
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<FoldingNode>,
}

/// Slot storage for folding nodes; freed slots are reused under a new generation.
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: FoldingNode) -> NodeId {
        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot];
                entry.node = Some(node);
                NodeId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    slot: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<FoldingNode> {
        let entry = self
            .slots
            .get_mut(id.slot)
            .filter(|entry| entry.generation == id.generation)?;
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.live -= 1;
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&FoldingNode> {
        let entry = self.slots.get(id.slot)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut FoldingNode> {
        let entry = self.slots.get_mut(id.slot)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.node.as_mut()
    }

    /// Number of live nodes, including the root.
    pub(crate) fn len(&self) -> usize {
        self.live
    }
}

// Indexing with a dangling id panics.
impl Index<NodeId> for NodeArena {
    type Output = FoldingNode;

    fn index(&self, id: NodeId) -> &FoldingNode {
        match self.get(id) {
            Some(node) => node,
            None => panic!("dangling folding node {id}"),
        }
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut FoldingNode {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("dangling folding node {id}"),
        }
    }
}
