//! Sibling allocation.
//!
//! An allocator decides which component a node takes among its new siblings. The dense
//! allocator numbers the whole group and relabels every sibling whose label shifts; the
//! sparse allocator picks a key between the node's neighbours and never touches them.
//! Both also number a group from scratch for the rebuilder.

mod dense;
mod sparse;

pub use dense::DenseAllocator;
pub use sparse::SparseAllocator;

use crate::error::Result;
use crate::model::{Node, NodeId};
use crate::path::{Component, Encoding, Path};
use crate::rank::RankOrdering;

/// A sibling whose path must change because the group was renumbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relabel {
    /// Sibling id.
    pub id: NodeId,
    /// Path before the change; `None` for rows that never had one.
    pub from: Option<Path>,
    /// Path after the change.
    pub to: Path,
}

/// Result of placing one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Component of the placed node.
    pub component: Component,
    /// Other siblings whose paths change.
    pub relabels: Vec<Relabel>,
}

/// Where a node is being placed.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    /// The node with its new parent and attributes, and its current path if any.
    pub node: &'a Node,
    /// Path of the target parent; empty for roots.
    pub parent_path: &'a Path,
    /// Current members of the target group. A stale copy of `node` is ignored.
    pub siblings: &'a [Node],
    /// `true` when the node stays under the same parent.
    pub parent_unchanged: bool,
}

/// Strategy assigning components to siblings.
pub trait SiblingAllocator {
    /// Chooses the node's component and the sibling relabels that go with it.
    fn allocate(&self, placement: Placement<'_>, ordering: &RankOrdering) -> Result<Allocation>;

    /// Components for `count` siblings already in rank order.
    fn sequence(&self, parent: Option<NodeId>, count: usize) -> Result<Vec<Component>>;

    /// Renumbers a group after a member left. Allocators that tolerate gaps return nothing.
    fn compact(
        &self,
        _parent_path: &Path,
        _members: &[Node],
        _ordering: &RankOrdering,
    ) -> Result<Vec<Relabel>> {
        Ok(Vec::new())
    }
}

/// Allocator matching an encoding.
pub fn for_encoding(encoding: &Encoding) -> Box<dyn SiblingAllocator + Send + Sync> {
    match encoding {
        Encoding::Label(format) => Box::new(DenseAllocator::new(format.clone())),
        Encoding::Key(format) => Box::new(SparseAllocator::new(*format)),
    }
}
