#![warn(missing_docs)]
//! Textfold Core - Incremental Code Folding Engine
//!
//! # Overview
//!
//! `textfold-core` maintains the tree of foldable regions of a text document while it is being
//! edited. A highlighter reports, line by line, which region boundaries (braces, `BEGIN`/`END`
//! comments, ...) it saw; the tree pairs them up, keeps the pairing correct as lines are
//! inserted, removed and changed, and tracks which regions are collapsed so that real (buffer)
//! line numbers can be translated to virtual (displayed) line numbers and back.
//!
//! # Core Features
//!
//! - **Incremental matching**: only the edited line and what follows it in the enclosing
//!   regions is re-matched
//! - **Relative offsets**: inserting or removing a line shifts one path of the tree
//! - **Mismatch tolerance**: closing markers that match nothing are kept as invalid block ends
//! - **Collapsing**: collapsed regions hide their body lines; nested collapsed regions survive
//!   expanding their parent
//! - **Change Notifications**: subscribers receive [`FoldingEvent`]s
//!
//! # Quick Start
//!
//! ```rust
//! use textfold_core::{FoldedDocument, RegionKind, RegionMarker};
//!
//! let brace = RegionKind::new(1).unwrap();
//! let source = move |_line: usize, text: &str| {
//!     text.chars()
//!         .filter_map(|c| match c {
//!             '{' => Some(RegionMarker::Open(brace)),
//!             '}' => Some(RegionMarker::Close(brace)),
//!             _ => None,
//!         })
//!         .collect::<Vec<_>>()
//! };
//!
//! let mut doc = FoldedDocument::new("fn main() {\n    run();\n}\n", source);
//! assert_eq!(doc.tree().region_count(), 1);
//!
//! doc.toggle_fold(0);
//! assert_eq!(doc.tree().virtual_to_real_line(1), 3);
//! ```

pub mod document;
pub mod error;
pub mod event;
pub mod hidden;
pub mod marker;
pub mod node;
pub mod tree;

pub use document::FoldedDocument;
pub use error::FoldingError;
pub use event::{FoldingEvent, FoldingEventCallback};
pub use hidden::{HiddenLineBlock, HiddenLineBlocks};
pub use marker::{RegionKind, RegionMarker, RegionMarkerSource, markers_from_raw, simplify_markers};
pub use node::{FoldingNode, NodeId, NodeKind, UNTERMINATED_END};
pub use tree::{FoldRegionInfo, FoldingTree, LineInfo};
