//! Folding region tree
//!
//! [`FoldingTree`] keeps the hierarchy of foldable regions of a document up to date while the
//! document is edited line by line, and translates between real (buffer) lines and virtual
//! (displayed, folds collapsed) lines.
//!
//! # Example
//!
//! ```rust
//! use textfold_core::{FoldingTree, RegionKind, RegionMarker};
//!
//! let brace = RegionKind::new(1).unwrap();
//! let mut tree = FoldingTree::new();
//!
//! assert!(tree.update_line(0, &[RegionMarker::Open(brace)], true));
//! assert!(tree.update_line(5, &[RegionMarker::Close(brace)], true));
//! assert_eq!(tree.region_count(), 1);
//!
//! assert!(tree.toggle_region_visibility(0));
//! assert_eq!(tree.hidden_lines_count(), 5);
//! assert_eq!(tree.virtual_to_real_line(1), 6);
//! ```
//!
//! # Structure
//!
//! Nodes store their start line relative to the parent's start and their end line relative to
//! their own start, so shifting a whole subtree only touches its top node. Region matching is
//! stack based: an opening marker opens a region inside the innermost open region, a closing
//! marker closes the innermost open region if the kinds agree and is otherwise kept as an
//! unmatched leaf.
//!
//! Updating a line re-matches only what can change: the stack of regions open just before the
//! line is restored, the new markers of the line are applied, and everything after the line is
//! replayed. Subtrees opening after the line are re-attached whole, because nothing outside a
//! region can change how its interior matches.

use crate::error::FoldingError;
use crate::event::{FoldingEvent, FoldingEventCallback};
use crate::hidden::{HiddenLineBlock, HiddenLineBlocks};
use crate::marker::{RegionKind, RegionMarker, markers_from_raw, simplify_markers};
use crate::node::{FoldingNode, NodeArena, NodeId, NodeKind};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Write as _};

/// Folding information about a single line, as needed by a gutter renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineInfo {
    /// No region spans the line.
    pub top_level: bool,
    /// An expanded region opens on the line.
    pub starts_visible_block: bool,
    /// A collapsed region opens on the line.
    pub starts_invisible_block: bool,
    /// A region opened on an earlier line closes on the line.
    pub ends_block: bool,
    /// A closing marker on the line matched no open region.
    pub invalid_block_end: bool,
}

/// Flattened view of one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldRegionInfo {
    /// Node backing the region.
    pub id: NodeId,
    /// Region kind.
    pub kind: RegionKind,
    /// Absolute opening line.
    pub start_line: usize,
    /// Absolute closing line, `None` while unterminated.
    pub end_line: Option<usize>,
    /// Whether the region is collapsed.
    pub collapsed: bool,
    /// Nesting depth (top-level regions have depth 0).
    pub depth: usize,
}

/// A node together with its absolute start line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scope {
    id: NodeId,
    abs: usize,
}

/// How a node touches a given line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touch {
    Opens,
    Closes,
    Unmatched,
}

enum Visit {
    Enter(Scope),
    Exit(Scope),
}

/// Work detached from the tree while re-matching, replayed in document order.
enum Replay {
    /// A whole subtree opening after the updated line.
    Unit(Scope),
    /// A closing marker that has to be matched again.
    Close { kind: RegionKind, line: usize },
}

enum DetachStep {
    Enter(Scope),
    Exit(Scope),
    Emit(Replay),
    Free(NodeId),
}

/// Incrementally maintained tree of folding regions.
pub struct FoldingTree {
    nodes: NodeArena,
    root: NodeId,
    hidden: HiddenLineBlocks,
    /// Virtual line -> real line memo.
    line_mapping: RefCell<HashMap<usize, usize>>,
    /// Lines reprocessed even when reported unchanged.
    unchanged_line_override: BTreeSet<usize>,
    callbacks: Vec<FoldingEventCallback>,
}

impl fmt::Debug for FoldingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FoldingTree")
            .field("nodes", &self.nodes.len())
            .field("hidden", &self.hidden.as_slice())
            .field("unchanged_line_override", &self.unchanged_line_override)
            .finish_non_exhaustive()
    }
}

impl Default for FoldingTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FoldingTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        let mut nodes = NodeArena::default();
        let root = nodes.insert(FoldingNode::root());
        Self {
            nodes,
            root,
            hidden: HiddenLineBlocks::new(),
            line_mapping: RefCell::new(HashMap::new()),
            unchanged_line_override: BTreeSet::new(),
            callbacks: Vec::new(),
        }
    }

    /// Subscribe to folding events.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&FoldingEvent) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    fn emit(&mut self, event: FoldingEvent) {
        for callback in &mut self.callbacks {
            callback(&event);
        }
    }

    // ------------------------------------------------------------------
    // Structure queries
    // ------------------------------------------------------------------

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&FoldingNode> {
        self.nodes.get(id)
    }

    /// Number of nodes, excluding the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Absolute start line of a node, `None` if `id` no longer names a live node.
    pub fn start_line(&self, id: NodeId) -> Option<usize> {
        let mut line = 0;
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.nodes.get(node_id)?;
            line += node.start_rel;
            current = node.parent;
        }
        Some(line)
    }

    /// Absolute end line of a node.
    ///
    /// `None` while unterminated, for the root, and for ids that no longer name a live node.
    pub fn end_line(&self, id: NodeId) -> Option<usize> {
        let node = self.nodes.get(id)?;
        match node.kind {
            NodeKind::Root => None,
            _ if node.end_valid => Some(self.start_line(id)? + node.end_rel),
            _ => None,
        }
    }

    /// Children of `parent` that span `line`, in document order.
    fn children_touching(&self, parent: Scope, line: usize) -> Vec<Scope> {
        let children = &self.nodes[parent.id].children;
        let upper = children.partition_point(|&c| parent.abs + self.nodes[c].start_rel <= line);

        let mut found = Vec::new();
        for &child in children[..upper].iter().rev() {
            let abs = parent.abs + self.nodes[child].start_rel;
            if self.nodes[child].spans(abs, line) {
                found.push(Scope { id: child, abs });
            } else if abs < line {
                // Siblings do not overlap: nothing earlier reaches `line` either.
                break;
            }
        }
        found.reverse();
        found
    }

    /// The deepest region spanning `line`, or the root.
    pub fn find_node_for_line(&self, line: usize) -> NodeId {
        let mut scope = Scope {
            id: self.root,
            abs: 0,
        };
        loop {
            let next = self
                .children_touching(scope, line)
                .into_iter()
                .find(|c| self.nodes[c.id].is_open_region());
            match next {
                Some(child) => scope = child,
                None => return scope.id,
            }
        }
    }

    /// Check whether no region spans `line`.
    pub fn is_top_level(&self, line: usize) -> bool {
        self.children_touching(
            Scope {
                id: self.root,
                abs: 0,
            },
            line,
        )
        .is_empty()
    }

    /// Nodes that open, close, or sit unmatched at `line`, in textual marker order.
    fn line_touches(&self, line: usize) -> Vec<(Scope, Touch)> {
        let mut out = Vec::new();
        let mut work = vec![Visit::Enter(Scope {
            id: self.root,
            abs: 0,
        })];

        while let Some(visit) = work.pop() {
            match visit {
                Visit::Enter(scope) => {
                    match self.nodes[scope.id].kind {
                        NodeKind::Unmatched { .. } => {
                            out.push((scope, Touch::Unmatched));
                            continue;
                        }
                        NodeKind::Open { .. } if scope.abs == line => {
                            out.push((scope, Touch::Opens));
                        }
                        _ => {}
                    }
                    work.push(Visit::Exit(scope));
                    for child in self.children_touching(scope, line).into_iter().rev() {
                        work.push(Visit::Enter(child));
                    }
                }
                Visit::Exit(scope) => {
                    let node = &self.nodes[scope.id];
                    if node.is_open_region() && node.end_valid && scope.abs + node.end_rel == line
                    {
                        out.push((scope, Touch::Closes));
                    }
                }
            }
        }
        out
    }

    /// The markers currently recorded in the tree for `line`, in textual order.
    pub fn recorded_markers(&self, line: usize) -> Vec<RegionMarker> {
        self.line_touches(line)
            .into_iter()
            .filter_map(|(scope, touch)| {
                let kind = self.nodes[scope.id].kind.region_kind()?;
                Some(match touch {
                    Touch::Opens => RegionMarker::Open(kind),
                    Touch::Closes | Touch::Unmatched => RegionMarker::Close(kind),
                })
            })
            .collect()
    }

    /// Folding information for `line`.
    pub fn line_info(&self, line: usize) -> LineInfo {
        let mut info = LineInfo {
            top_level: self.is_top_level(line),
            ..LineInfo::default()
        };

        for (scope, touch) in self.line_touches(line) {
            match touch {
                Touch::Unmatched => info.invalid_block_end = true,
                Touch::Opens => {
                    if self.nodes[scope.id].visible {
                        info.starts_visible_block = true;
                    } else {
                        info.starts_invisible_block = true;
                    }
                }
                Touch::Closes => {
                    if scope.abs != line {
                        info.ends_block = true;
                    }
                }
            }
        }
        info
    }

    /// All regions in document order.
    pub fn regions(&self) -> Vec<FoldRegionInfo> {
        let mut out = Vec::new();
        let mut work: Vec<(Scope, usize)> = Vec::new();
        let root = Scope {
            id: self.root,
            abs: 0,
        };
        self.push_children_reversed(root, 0, &mut work);

        while let Some((scope, depth)) = work.pop() {
            let node = &self.nodes[scope.id];
            let NodeKind::Open { kind } = node.kind else {
                continue;
            };
            out.push(FoldRegionInfo {
                id: scope.id,
                kind,
                start_line: scope.abs,
                end_line: node.end_valid.then(|| scope.abs + node.end_rel),
                collapsed: !node.visible,
                depth,
            });
            self.push_children_reversed(scope, depth + 1, &mut work);
        }
        out
    }

    fn push_children_reversed(&self, scope: Scope, depth: usize, work: &mut Vec<(Scope, usize)>) {
        for &child in self.nodes[scope.id].children.iter().rev() {
            let abs = scope.abs + self.nodes[child].start_rel;
            work.push((Scope { id: child, abs }, depth));
        }
    }

    /// Number of regions (open nodes, closed or not).
    pub fn region_count(&self) -> usize {
        self.regions().len()
    }

    /// Closing markers that matched no region, as `(line, kind)` in document order.
    pub fn unmatched_closings(&self) -> Vec<(usize, RegionKind)> {
        let mut out = Vec::new();
        let mut work = Vec::new();
        self.push_children_reversed(
            Scope {
                id: self.root,
                abs: 0,
            },
            0,
            &mut work,
        );
        while let Some((scope, depth)) = work.pop() {
            match self.nodes[scope.id].kind {
                NodeKind::Unmatched { kind } => out.push((scope.abs, kind)),
                _ => self.push_children_reversed(scope, depth + 1, &mut work),
            }
        }
        out
    }

    /// Render the tree for debugging, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut work = vec![(self.root, 0usize)];
        while let Some((id, depth)) = work.pop() {
            let node = &self.nodes[id];
            let end = match node.end_line_relative() {
                Some(end) => end.to_string(),
                None => "-".to_string(),
            };
            let _ = writeln!(
                out,
                "{:indent$}type={} start_rel={} start_valid={} end_rel={} visible={}",
                "",
                node.kind.raw(),
                node.start_rel,
                node.start_valid,
                end,
                node.visible,
                indent = depth * 3
            );
            for &child in node.children.iter().rev() {
                work.push((child, depth + 1));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Incremental construction
    // ------------------------------------------------------------------

    /// Update the markers of `line`.
    ///
    /// `markers` are in textual order. When `changed` is `false` the call is a no-op unless the
    /// line was flagged for reprocessing by a line insertion or removal nearby.
    ///
    /// Returns whether the region structure changed.
    pub fn update_line(&mut self, line: usize, markers: &[RegionMarker], changed: bool) -> bool {
        let forced = self.unchanged_line_override.remove(&line);
        if !changed && !forced {
            return false;
        }

        let markers = simplify_markers(markers);
        let structure_changed = self.rematch_line(line, &markers);
        if structure_changed {
            tracing::trace!(line, markers = markers.len(), "fold.update");
            self.after_structure_change(line);
        }
        structure_changed
    }

    /// [`FoldingTree::update_line`] taking the signed marker encoding.
    pub fn update_line_raw(
        &mut self,
        line: usize,
        markers: &[i8],
        changed: bool,
    ) -> Result<bool, FoldingError> {
        let markers = markers_from_raw(markers)?;
        Ok(self.update_line(line, &markers, changed))
    }

    fn after_structure_change(&mut self, line: usize) {
        self.line_mapping.borrow_mut().clear();
        self.rebuild_hidden_blocks();
        self.hidden.invalidate_count();
        self.emit(FoldingEvent::StructureChanged { line });
    }

    /// Replace the markers recorded at `line` with `markers` (already simplified).
    fn rematch_line(&mut self, line: usize, markers: &[RegionMarker]) -> bool {
        let touches = self.line_touches(line);
        for &(scope, touch) in &touches {
            let node = &mut self.nodes[scope.id];
            match touch {
                Touch::Opens => node.delete_opening = true,
                Touch::Closes => node.delete_ending = true,
                Touch::Unmatched => {
                    node.delete_opening = true;
                    node.delete_ending = true;
                }
            }
        }

        if self.recorded_markers(line) == markers {
            for (scope, _) in touches {
                self.nodes[scope.id].clear_marks();
            }
            return false;
        }

        let (mut stack, replay) = self.detach_from(line);

        for &marker in markers {
            self.apply_marker(&mut stack, marker, line);
        }
        for item in replay {
            match item {
                Replay::Unit(unit) => self.attach_unit(&stack, unit),
                Replay::Close { kind, line: at } => {
                    self.apply_marker(&mut stack, RegionMarker::Close(kind), at)
                }
            }
        }

        // Whatever is still open was never closed; it cannot stay collapsed.
        for scope in stack.iter().skip(1) {
            let node = &mut self.nodes[scope.id];
            node.set_unterminated();
            node.visible = true;
        }
        true
    }

    /// Detach everything at or after `line`.
    ///
    /// Returns the stack of regions open just before `line` (root first; their ends reset to
    /// unterminated) and the detached remainder in document order. Nodes marked for opening
    /// deletion and unmatched leaves are freed; their closing markers and children are replayed.
    fn detach_from(&mut self, line: usize) -> (Vec<Scope>, Vec<Replay>) {
        let mut stack = Vec::new();
        let mut replay = Vec::new();
        let mut work = vec![DetachStep::Enter(Scope {
            id: self.root,
            abs: 0,
        })];

        while let Some(step) = work.pop() {
            match step {
                DetachStep::Enter(scope) => {
                    if !self.nodes[scope.id].delete_opening {
                        stack.push(scope);
                    }
                    work.push(DetachStep::Exit(scope));

                    let children = std::mem::take(&mut self.nodes[scope.id].children);
                    let mut kept = Vec::with_capacity(children.len());
                    let mut pending = Vec::new();
                    for child in children {
                        let node = &self.nodes[child];
                        let abs = scope.abs + node.start_rel;
                        if abs < line {
                            kept.push(child);
                            if node.is_open_region() && node.spans(abs, line) {
                                pending.push(DetachStep::Enter(Scope { id: child, abs }));
                            }
                            continue;
                        }
                        match node.kind {
                            NodeKind::Unmatched { kind } => {
                                if abs > line {
                                    pending.push(DetachStep::Emit(Replay::Close { kind, line: abs }));
                                }
                                pending.push(DetachStep::Free(child));
                            }
                            _ if abs == line => {
                                pending.push(DetachStep::Enter(Scope { id: child, abs }));
                            }
                            _ => pending.push(DetachStep::Emit(Replay::Unit(Scope { id: child, abs }))),
                        }
                    }
                    self.nodes[scope.id].children = kept;
                    work.extend(pending.into_iter().rev());
                }
                DetachStep::Exit(scope) => {
                    let node = &mut self.nodes[scope.id];
                    let NodeKind::Open { kind } = node.kind else {
                        continue;
                    };
                    if node.end_valid && scope.abs + node.end_rel > line {
                        replay.push(Replay::Close {
                            kind,
                            line: scope.abs + node.end_rel,
                        });
                    }
                    if node.delete_opening {
                        self.nodes.remove(scope.id);
                    } else {
                        node.set_unterminated();
                        node.clear_marks();
                    }
                }
                DetachStep::Emit(item) => replay.push(item),
                DetachStep::Free(id) => {
                    self.nodes.remove(id);
                }
            }
        }

        (stack, replay)
    }

    fn apply_marker(&mut self, stack: &mut Vec<Scope>, marker: RegionMarker, at: usize) {
        let Some(&top) = stack.last() else {
            return;
        };
        match marker {
            RegionMarker::Open(kind) => {
                let id = self
                    .nodes
                    .insert(FoldingNode::open(top.id, kind, at - top.abs));
                self.nodes[top.id].children.push(id);
                stack.push(Scope { id, abs: at });
            }
            RegionMarker::Close(kind) => {
                let node = &mut self.nodes[top.id];
                if node.kind == (NodeKind::Open { kind }) {
                    node.end_valid = true;
                    node.end_rel = at - top.abs;
                    stack.pop();
                } else {
                    let id = self
                        .nodes
                        .insert(FoldingNode::unmatched(top.id, kind, at - top.abs));
                    self.nodes[top.id].children.push(id);
                }
            }
        }
    }

    fn attach_unit(&mut self, stack: &[Scope], unit: Scope) {
        let Some(&top) = stack.last() else {
            return;
        };
        let node = &mut self.nodes[unit.id];
        node.parent = Some(top.id);
        node.start_rel = unit.abs - top.abs;
        self.nodes[top.id].children.push(unit.id);
    }

    // ------------------------------------------------------------------
    // Line shifts
    // ------------------------------------------------------------------

    fn invalidate_line_caches(&self) {
        self.line_mapping.borrow_mut().clear();
        self.hidden.invalidate_count();
    }

    fn mark_neighbours(&mut self, line: usize) {
        if let Some(prev) = line.checked_sub(1) {
            self.unchanged_line_override.insert(prev);
        }
        self.unchanged_line_override.insert(line);
        self.unchanged_line_override.insert(line + 1);
    }

    /// Check whether `line` is flagged for reprocessing.
    pub fn needs_reprocessing(&self, line: usize) -> bool {
        self.unchanged_line_override.contains(&line)
    }

    /// A new line was inserted at `line`; the old line `line` and everything after moved down.
    pub fn line_inserted(&mut self, line: usize) {
        self.invalidate_line_caches();
        self.mark_neighbours(line);

        let mut scope = Scope {
            id: self.root,
            abs: 0,
        };
        loop {
            let first_after = self.first_child_from(scope, line);
            let count = self.nodes[scope.id].children.len();
            for idx in first_after..count {
                let child = self.nodes[scope.id].children[idx];
                self.nodes[child].start_rel += 1;
            }

            let Some(prev_idx) = first_after.checked_sub(1) else {
                break;
            };
            let prev = self.nodes[scope.id].children[prev_idx];
            let abs = scope.abs + self.nodes[prev].start_rel;
            let node = &mut self.nodes[prev];
            if !node.is_open_region() {
                break;
            }
            if node.end_valid {
                if abs + node.end_rel < line {
                    break;
                }
                node.end_rel += 1;
            }
            scope = Scope { id: prev, abs };
        }

        self.hidden.shift_for_insert(line);
        tracing::trace!(line, "fold.line_inserted");
    }

    /// Line `line` was removed; everything after it moved up.
    ///
    /// Markers recorded on the removed line are retracted first.
    pub fn line_removed(&mut self, line: usize) {
        self.invalidate_line_caches();
        self.mark_neighbours(line);

        if self.rematch_line(line, &[]) {
            self.after_structure_change(line);
        }

        let mut scope = Scope {
            id: self.root,
            abs: 0,
        };
        loop {
            let first_after = self.first_child_from(scope, line + 1);
            let count = self.nodes[scope.id].children.len();
            for idx in first_after..count {
                let child = self.nodes[scope.id].children[idx];
                self.nodes[child].start_rel -= 1;
            }

            let Some(prev_idx) = first_after.checked_sub(1) else {
                break;
            };
            let prev = self.nodes[scope.id].children[prev_idx];
            let abs = scope.abs + self.nodes[prev].start_rel;
            let node = &mut self.nodes[prev];
            if !node.is_open_region() {
                break;
            }
            if node.end_valid {
                if abs + node.end_rel <= line {
                    break;
                }
                node.end_rel -= 1;
            }
            scope = Scope { id: prev, abs };
        }

        self.hidden.shift_for_remove(line);
        tracing::trace!(line, "fold.line_removed");
    }

    /// Index of the first child of `scope` starting at or after `line`.
    fn first_child_from(&self, scope: Scope, line: usize) -> usize {
        self.nodes[scope.id]
            .children
            .partition_point(|&c| scope.abs + self.nodes[c].start_rel < line)
    }

    // ------------------------------------------------------------------
    // Visibility
    // ------------------------------------------------------------------

    /// The outermost region opening exactly at `line`.
    fn region_opening_at(&self, line: usize) -> Option<Scope> {
        let mut scope = Scope {
            id: self.root,
            abs: 0,
        };
        loop {
            let touching = self.children_touching(scope, line);
            if let Some(found) = touching
                .iter()
                .find(|c| c.abs == line && self.nodes[c.id].is_open_region())
            {
                return Some(*found);
            }
            scope = touching
                .into_iter()
                .find(|c| c.abs < line && self.nodes[c.id].is_open_region())?;
        }
    }

    /// The region opening at `line`, if any.
    pub fn region_at(&self, line: usize) -> Option<NodeId> {
        self.region_opening_at(line).map(|scope| scope.id)
    }

    /// Collapse or expand the outermost region opening at `line`.
    ///
    /// Returns `false` if no closed region opens at `line`.
    pub fn toggle_region_visibility(&mut self, line: usize) -> bool {
        let Some(scope) = self.region_opening_at(line) else {
            return false;
        };
        let node = &mut self.nodes[scope.id];
        if !node.end_valid {
            return false;
        }
        node.visible = !node.visible;
        let visible = node.visible;
        let end_rel = node.end_rel;

        self.invalidate_line_caches();
        // The header may be folded away itself; enclosed blocks are ignored on insert.
        if visible {
            if self.hidden.remove_starting_at(line + 1).is_some() {
                self.emit(FoldingEvent::LinesVisibilityChanged {
                    start: line + 1,
                    end: line + end_rel,
                    visible: true,
                });
            }
            self.rehide_collapsed_descendants(scope);
        } else {
            self.hide_region(line, end_rel);
        }

        tracing::debug!(line, visible, "fold.toggle");
        self.emit(FoldingEvent::RegionVisibilityChanged { line });
        true
    }

    /// Collapse the region opening at `line` if it is expanded.
    pub fn collapse_region(&mut self, line: usize) -> bool {
        match self.region_opening_at(line) {
            Some(scope) if self.nodes[scope.id].visible => self.toggle_region_visibility(line),
            _ => false,
        }
    }

    /// Expand the region opening at `line` if it is collapsed.
    pub fn expand_region(&mut self, line: usize) -> bool {
        match self.region_opening_at(line) {
            Some(scope) if !self.nodes[scope.id].visible => self.toggle_region_visibility(line),
            _ => false,
        }
    }

    fn hide_region(&mut self, header: usize, end_rel: usize) {
        if self.hidden.insert(HiddenLineBlock::new(header + 1, end_rel)) {
            self.emit(FoldingEvent::LinesVisibilityChanged {
                start: header + 1,
                end: header + end_rel,
                visible: false,
            });
        }
    }

    /// Re-register hidden blocks for collapsed regions below `scope`.
    fn rehide_collapsed_descendants(&mut self, scope: Scope) {
        let mut to_hide = Vec::new();
        let mut work = vec![scope];
        while let Some(current) = work.pop() {
            for &child in &self.nodes[current.id].children {
                let node = &self.nodes[child];
                if !node.is_open_region() {
                    continue;
                }
                let abs = current.abs + node.start_rel;
                if !node.visible && node.end_valid {
                    to_hide.push((abs, node.end_rel));
                } else {
                    work.push(Scope { id: child, abs });
                }
            }
        }
        for (header, end_rel) in to_hide {
            self.hide_region(header, end_rel);
        }
    }

    /// Recompute all hidden blocks from the collapsed regions.
    fn rebuild_hidden_blocks(&mut self) {
        self.hidden.clear();
        let root = Scope {
            id: self.root,
            abs: 0,
        };
        let mut blocks = Vec::new();
        let mut work = vec![root];
        while let Some(current) = work.pop() {
            for &child in &self.nodes[current.id].children {
                let node = &self.nodes[child];
                if !node.is_open_region() {
                    continue;
                }
                let abs = current.abs + node.start_rel;
                if !node.visible && node.end_valid {
                    blocks.push(HiddenLineBlock::new(abs + 1, node.end_rel));
                } else {
                    work.push(Scope { id: child, abs });
                }
            }
        }
        for block in blocks {
            self.hidden.insert(block);
        }
    }

    fn open_region_ids(&self) -> Vec<NodeId> {
        self.regions().into_iter().map(|r| r.id).collect()
    }

    /// Expand every region.
    pub fn expand_all(&mut self) {
        for id in self.open_region_ids() {
            self.nodes[id].visible = true;
        }
        let blocks = self.hidden.as_slice().to_vec();
        self.hidden.clear();
        self.invalidate_line_caches();
        for block in blocks {
            self.emit(FoldingEvent::LinesVisibilityChanged {
                start: block.start,
                end: block.end() - 1,
                visible: true,
            });
        }
    }

    /// Collapse every closed region.
    pub fn collapse_all(&mut self) {
        for id in self.open_region_ids() {
            let node = &mut self.nodes[id];
            if node.end_valid {
                node.visible = false;
            }
        }
        self.rebuild_hidden_blocks();
        self.invalidate_line_caches();
        let blocks = self.hidden.as_slice().to_vec();
        for block in blocks {
            self.emit(FoldingEvent::LinesVisibilityChanged {
                start: block.start,
                end: block.end() - 1,
                visible: false,
            });
        }
    }

    // ------------------------------------------------------------------
    // Line translation
    // ------------------------------------------------------------------

    /// Hidden line blocks, ordered by start line.
    pub fn hidden_blocks(&self) -> &[HiddenLineBlock] {
        self.hidden.as_slice()
    }

    /// Total number of hidden lines.
    pub fn hidden_lines_count(&self) -> usize {
        self.hidden.hidden_lines_count()
    }

    /// Check if a real line is displayed.
    pub fn is_line_visible(&self, real_line: usize) -> bool {
        !self.hidden.is_hidden(real_line)
    }

    /// Translate a displayed line number to a buffer line number.
    pub fn virtual_to_real_line(&self, virtual_line: usize) -> usize {
        let cached = self.line_mapping.borrow().get(&virtual_line).copied();
        if let Some(real) = cached {
            return real;
        }
        let real = self.hidden.virtual_to_real(virtual_line);
        self.line_mapping.borrow_mut().insert(virtual_line, real);
        real
    }

    /// Translate a buffer line number to a displayed line number.
    ///
    /// Hidden lines map to the displayed line of the fold header hiding them.
    pub fn real_to_virtual_line(&self, real_line: usize) -> usize {
        self.hidden.real_to_virtual(real_line)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Whether every line after `header` up to `header + end_rel` is covered by hidden blocks.
    fn body_hidden(&self, header: usize, end_rel: usize) -> bool {
        let last = header + end_rel;
        let mut line = header + 1;
        while line <= last {
            match self.hidden.block_containing(line) {
                Some(block) => line = block.end(),
                None => return false,
            }
        }
        true
    }

    /// Verify the structural invariants of the tree.
    pub fn check_invariants(&self) -> Result<(), FoldingError> {
        let mut reachable = 1usize;
        // (scope, absolute end of the scope if closed)
        let mut work: Vec<(Scope, Option<usize>)> = vec![(
            Scope {
                id: self.root,
                abs: 0,
            },
            None,
        )];

        while let Some((scope, scope_end)) = work.pop() {
            let mut prev_start = None;
            for &child in &self.nodes[scope.id].children {
                reachable += 1;
                let Some(node) = self.nodes.get(child) else {
                    return Err(FoldingError::BrokenParentLink {
                        node: child,
                        expected: scope.id,
                        found: None,
                    });
                };
                if node.parent != Some(scope.id) {
                    return Err(FoldingError::BrokenParentLink {
                        node: child,
                        expected: scope.id,
                        found: node.parent,
                    });
                }

                let abs = scope.abs + node.start_rel;
                if prev_start.is_some_and(|prev| abs < prev) {
                    return Err(FoldingError::UnsortedChildren { node: scope.id });
                }
                prev_start = Some(abs);

                let end = match node.kind {
                    NodeKind::Root => {
                        return Err(FoldingError::BrokenParentLink {
                            node: child,
                            expected: scope.id,
                            found: node.parent,
                        });
                    }
                    NodeKind::Unmatched { .. } => {
                        if node.start_valid
                            || !node.end_valid
                            || node.end_rel != 0
                            || !node.children.is_empty()
                        {
                            return Err(FoldingError::MalformedUnmatched { line: abs });
                        }
                        Some(abs)
                    }
                    NodeKind::Open { .. } => node.end_valid.then(|| abs + node.end_rel),
                };

                if let Some(parent_end) = scope_end {
                    match end {
                        None => {
                            return Err(FoldingError::UnterminatedInsideClosed { line: scope.abs });
                        }
                        Some(end) if end > parent_end => {
                            return Err(FoldingError::EscapesParent {
                                start: abs,
                                parent_end,
                            });
                        }
                        _ => {}
                    }
                }

                if node.is_open_region() {
                    if !node.visible && node.end_valid && !self.body_hidden(abs, node.end_rel) {
                        return Err(FoldingError::CollapsedRegionShown { line: abs });
                    }
                    work.push((Scope { id: child, abs }, end));
                }
            }
        }

        if reachable != self.nodes.len() {
            return Err(FoldingError::Orphans {
                count: self.nodes.len().saturating_sub(reachable),
            });
        }

        for pair in self.hidden.as_slice().windows(2) {
            if pair[0].end() > pair[1].start {
                return Err(FoldingError::OverlappingHiddenBlocks {
                    line: pair[1].start,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kind(k: u8) -> RegionKind {
        RegionKind::new(k).unwrap()
    }

    fn open(k: u8) -> RegionMarker {
        RegionMarker::Open(kind(k))
    }

    fn close(k: u8) -> RegionMarker {
        RegionMarker::Close(kind(k))
    }

    fn spans(tree: &FoldingTree) -> Vec<(usize, Option<usize>, usize)> {
        tree.regions()
            .into_iter()
            .map(|r| (r.start_line, r.end_line, r.depth))
            .collect()
    }

    #[test]
    fn test_single_region() {
        let mut tree = FoldingTree::new();
        assert!(tree.update_line(0, &[open(1)], true));
        assert!(tree.update_line(5, &[close(1)], true));

        let regions = tree.regions();
        assert_eq!(regions.len(), 1);
        let node = tree.node(regions[0].id).unwrap();
        assert_eq!(node.start_line_relative(), 0);
        assert_eq!(node.end_line_relative(), Some(5));
        assert!(node.end_valid());
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_same_line_pair_creates_nothing() {
        let mut tree = FoldingTree::new();
        assert!(!tree.update_line(3, &[open(1), close(1)], true));
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn test_unchanged_line_is_skipped() {
        let mut tree = FoldingTree::new();
        assert!(!tree.update_line(0, &[open(1)], false));
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn test_nested_regions_and_relative_offsets() {
        let mut tree = FoldingTree::new();
        tree.update_line(1, &[open(1)], true);
        tree.update_line(3, &[open(1)], true);
        tree.update_line(5, &[close(1)], true);
        tree.update_line(8, &[close(1)], true);

        assert_eq!(spans(&tree), vec![(1, Some(8), 0), (3, Some(5), 1)]);
        let inner = tree.regions()[1].id;
        assert_eq!(tree.node(inner).unwrap().start_line_relative(), 2);
        assert_eq!(tree.node(inner).unwrap().end_line_relative(), Some(2));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_opening_inserted_before_existing_regions_adopts_them() {
        let mut tree = FoldingTree::new();
        tree.update_line(2, &[open(1)], true);
        tree.update_line(4, &[close(1)], true);
        tree.update_line(6, &[open(1)], true);
        tree.update_line(7, &[close(1)], true);
        tree.update_line(9, &[close(1)], true);
        assert_eq!(tree.unmatched_closings(), vec![(9, kind(1))]);

        // An earlier opening surfaces and pairs with the stray closing marker.
        tree.update_line(0, &[open(1)], true);
        assert_eq!(
            spans(&tree),
            vec![(0, Some(9), 0), (2, Some(4), 1), (6, Some(7), 1)]
        );
        assert!(tree.unmatched_closings().is_empty());
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_mismatched_close_becomes_unmatched_leaf() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[close(2)], true);
        tree.update_line(4, &[close(1)], true);

        assert_eq!(spans(&tree), vec![(0, Some(4), 0)]);
        assert_eq!(tree.unmatched_closings(), vec![(2, kind(2))]);
        assert!(tree.line_info(2).invalid_block_end);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_removing_opening_reparents_children() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(1, &[open(2)], true);
        tree.update_line(2, &[close(2)], true);
        tree.update_line(3, &[close(1)], true);

        assert!(tree.update_line(0, &[], true));
        assert_eq!(spans(&tree), vec![(1, Some(2), 0)]);
        assert_eq!(tree.unmatched_closings(), vec![(3, kind(1))]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_removing_closing_extends_region() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[close(1)], true);
        tree.update_line(4, &[close(1)], true);

        assert_eq!(spans(&tree), vec![(0, Some(2), 0)]);
        assert!(tree.update_line(2, &[], true));
        assert_eq!(spans(&tree), vec![(0, Some(4), 0)]);
        assert!(tree.unmatched_closings().is_empty());
    }

    #[test]
    fn test_reporting_the_same_markers_is_no_change() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(3, &[close(1), open(1)], true);
        tree.update_line(6, &[close(1)], true);
        let before = tree.dump();

        assert!(!tree.update_line(3, &[close(1), open(1)], true));
        assert!(!tree.update_line(0, &[open(1)], true));
        assert_eq!(tree.dump(), before);
    }

    #[test]
    fn test_close_then_open_on_one_line() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(3, &[close(1), open(1)], true);
        tree.update_line(6, &[close(1)], true);

        assert_eq!(spans(&tree), vec![(0, Some(3), 0), (3, Some(6), 0)]);
        let info = tree.line_info(3);
        assert!(info.ends_block);
        assert!(info.starts_visible_block);
        assert_eq!(tree.recorded_markers(3), vec![close(1), open(1)]);
    }

    #[test]
    fn test_line_info_top_level() {
        let mut tree = FoldingTree::new();
        tree.update_line(2, &[open(1)], true);
        tree.update_line(4, &[close(1)], true);

        assert!(tree.line_info(0).top_level);
        assert!(!tree.line_info(3).top_level);
        assert!(tree.line_info(2).starts_visible_block);
        assert!(tree.line_info(4).ends_block);
        assert!(tree.line_info(5).top_level);
    }

    #[test]
    fn test_find_node_for_line() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[open(1)], true);
        tree.update_line(4, &[close(1)], true);
        tree.update_line(6, &[close(1)], true);

        let regions = tree.regions();
        assert_eq!(tree.find_node_for_line(1), regions[0].id);
        assert_eq!(tree.find_node_for_line(3), regions[1].id);
        assert_eq!(tree.find_node_for_line(9), tree.root());
        assert_eq!(tree.start_line(regions[1].id), Some(2));
        assert_eq!(tree.end_line(regions[1].id), Some(4));
    }

    #[test]
    fn test_line_inserted_shifts_offsets() {
        let mut tree = FoldingTree::new();
        tree.update_line(1, &[open(1)], true);
        tree.update_line(3, &[open(1)], true);
        tree.update_line(5, &[close(1)], true);
        tree.update_line(8, &[close(1)], true);
        tree.update_line(10, &[open(2)], true);
        tree.update_line(12, &[close(2)], true);

        tree.line_inserted(4);
        assert_eq!(
            spans(&tree),
            vec![(1, Some(9), 0), (3, Some(6), 1), (11, Some(13), 0)]
        );
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_line_inserted_then_removed_restores_offsets() {
        let mut tree = FoldingTree::new();
        tree.update_line(1, &[open(1)], true);
        tree.update_line(3, &[open(1)], true);
        tree.update_line(5, &[close(1)], true);
        tree.update_line(8, &[close(1)], true);
        tree.update_line(9, &[open(3)], true);
        let before = tree.dump();

        for line in [0, 1, 2, 3, 5, 6, 8, 9, 10, 20] {
            tree.line_inserted(line);
            tree.line_removed(line);
            assert_eq!(tree.dump(), before, "line {line}");
        }
    }

    #[test]
    fn test_line_removed_retracts_markers_on_that_line() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[open(1)], true);
        tree.update_line(4, &[close(1)], true);
        tree.update_line(6, &[close(1)], true);

        tree.line_removed(2);
        // The inner opening is gone, so its closing (now line 3) closes the outer region.
        assert_eq!(spans(&tree), vec![(0, Some(3), 0)]);
        assert_eq!(tree.unmatched_closings(), vec![(5, kind(1))]);
        assert!(tree.needs_reprocessing(1));
        assert!(tree.needs_reprocessing(2));
        assert!(tree.needs_reprocessing(3));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_neighbour_flag_forces_unchanged_update() {
        let mut tree = FoldingTree::new();
        tree.line_inserted(4);
        assert!(tree.update_line(5, &[open(1)], false));
        // The flag is consumed.
        assert!(!tree.update_line(5, &[], false));
        assert_eq!(tree.region_count(), 1);
    }

    #[test]
    fn test_toggle_hides_region_body() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(5, &[close(1)], true);

        assert!(tree.toggle_region_visibility(0));
        assert_eq!(tree.hidden_blocks(), &[HiddenLineBlock::new(1, 5)]);
        assert_eq!(tree.hidden_lines_count(), 5);
        for line in 1..=5 {
            assert!(!tree.is_line_visible(line));
        }
        assert!(tree.is_line_visible(6));
        assert!(tree.line_info(0).starts_invisible_block);

        assert!(tree.toggle_region_visibility(0));
        assert_eq!(tree.hidden_lines_count(), 0);
    }

    #[test]
    fn test_toggle_requires_region_start() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        assert!(!tree.toggle_region_visibility(0), "unterminated region");
        tree.update_line(5, &[close(1)], true);
        assert!(!tree.toggle_region_visibility(3));
    }

    #[test]
    fn test_expanding_parent_keeps_child_collapsed() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[open(1)], true);
        tree.update_line(4, &[close(1)], true);
        tree.update_line(8, &[close(1)], true);

        assert!(tree.toggle_region_visibility(2));
        assert_eq!(tree.hidden_blocks(), &[HiddenLineBlock::new(3, 2)]);

        assert!(tree.toggle_region_visibility(0));
        assert_eq!(tree.hidden_blocks(), &[HiddenLineBlock::new(1, 8)]);

        assert!(tree.toggle_region_visibility(0));
        assert_eq!(tree.hidden_blocks(), &[HiddenLineBlock::new(3, 2)]);
        assert_eq!(tree.hidden_lines_count(), 2);
    }

    #[test]
    fn test_virtual_real_round_trip() {
        let mut tree = FoldingTree::new();
        tree.update_line(1, &[open(1)], true);
        tree.update_line(4, &[close(1)], true);
        tree.update_line(7, &[open(1)], true);
        tree.update_line(9, &[close(1)], true);
        tree.toggle_region_visibility(1);
        tree.toggle_region_visibility(7);

        for real in (0..20).filter(|&l| tree.is_line_visible(l)) {
            let virtual_line = tree.real_to_virtual_line(real);
            assert_eq!(tree.virtual_to_real_line(virtual_line), real);
        }
        assert_eq!(tree.virtual_to_real_line(2), 5);
        assert_eq!(tree.real_to_virtual_line(10), 5);
        assert_eq!(tree.real_to_virtual_line(3), 1);
    }

    #[test]
    fn test_structure_edit_updates_hidden_block() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(3, &[close(1)], true);
        tree.update_line(6, &[close(1)], true);
        tree.toggle_region_visibility(0);
        assert_eq!(tree.hidden_lines_count(), 3);

        // The region now ends at the later closing marker.
        tree.update_line(3, &[], true);
        assert_eq!(tree.hidden_blocks(), &[HiddenLineBlock::new(1, 6)]);
        assert_eq!(tree.virtual_to_real_line(1), 7);
    }

    #[test]
    fn test_region_losing_its_end_is_expanded() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(3, &[close(1)], true);
        tree.toggle_region_visibility(0);

        tree.update_line(3, &[], true);
        assert!(tree.hidden_blocks().is_empty());
        assert!(!tree.regions()[0].collapsed);
    }

    #[test]
    fn test_collapse_and_expand_all() {
        let mut tree = FoldingTree::new();
        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[open(1)], true);
        tree.update_line(3, &[close(1)], true);
        tree.update_line(5, &[close(1)], true);
        tree.update_line(7, &[open(1)], true);
        tree.update_line(9, &[close(1)], true);

        tree.collapse_all();
        assert_eq!(
            tree.hidden_blocks(),
            &[HiddenLineBlock::new(1, 5), HiddenLineBlock::new(8, 2)]
        );
        tree.expand_all();
        assert!(tree.hidden_blocks().is_empty());
        assert!(tree.regions().iter().all(|r| !r.collapsed));
    }

    #[test]
    fn test_events_are_delivered() {
        use std::sync::{Arc, Mutex};

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut tree = FoldingTree::new();
        tree.subscribe(move |event| sink.lock().unwrap().push(*event));

        tree.update_line(0, &[open(1)], true);
        tree.update_line(2, &[close(1)], true);
        tree.toggle_region_visibility(0);

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                FoldingEvent::StructureChanged { line: 0 },
                FoldingEvent::StructureChanged { line: 2 },
                FoldingEvent::LinesVisibilityChanged {
                    start: 1,
                    end: 2,
                    visible: false
                },
                FoldingEvent::RegionVisibilityChanged { line: 0 },
            ]
        );
    }

    #[test]
    fn test_raw_markers() {
        let mut tree = FoldingTree::new();
        assert_eq!(tree.update_line_raw(0, &[1], true), Ok(true));
        assert_eq!(tree.update_line_raw(5, &[-1], true), Ok(true));
        assert_eq!(
            tree.update_line_raw(6, &[0], true),
            Err(FoldingError::InvalidMarker(0))
        );
        assert_eq!(tree.region_count(), 1);
    }
}
