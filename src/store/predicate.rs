use crate::model::{Node, NodeId};
use crate::path::Path;

/// Row filters understood by every [`NodeSource`](super::NodeSource).
///
/// Path predicates never match rows without a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every row.
    All,
    /// The row with this id.
    Id(NodeId),
    /// Rows whose parent reference is this id, or roots for `None`.
    ParentIs(Option<NodeId>),
    /// Rows whose path extends `path`; the row at `path` itself too when `inclusive`.
    DescendantOf {
        /// Prefix to match.
        path: Path,
        /// Whether `path` itself matches.
        inclusive: bool,
    },
    /// Rows whose path is a prefix of `path`.
    AncestorOf {
        /// Path whose prefixes match.
        path: Path,
        /// Whether `path` itself matches.
        inclusive: bool,
    },
    /// Rows exactly one level below `path`; roots for the empty path.
    ChildrenOf(Path),
    /// Rows whose path has this many components.
    Depth(usize),
    /// Rows with this exact path.
    PathEquals(Path),
    /// Rows without a path.
    PathIsNull,
}

impl Predicate {
    /// Evaluates the predicate against one row.
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Id(id) => node.id == *id,
            Predicate::ParentIs(parent) => node.parent == *parent,
            Predicate::PathIsNull => node.path.is_none(),
            Predicate::DescendantOf { path, inclusive } => node
                .path
                .as_ref()
                .is_some_and(|own| path.is_prefix_of(own, *inclusive)),
            Predicate::AncestorOf { path, inclusive } => node
                .path
                .as_ref()
                .is_some_and(|own| !own.is_empty() && own.is_prefix_of(path, *inclusive)),
            Predicate::ChildrenOf(path) => node
                .path
                .as_ref()
                .is_some_and(|own| own.is_child_of(path)),
            Predicate::Depth(depth) => node.path.as_ref().is_some_and(|own| own.depth() == *depth),
            Predicate::PathEquals(path) => node.path.as_ref() == Some(path),
        }
    }
}
