#![forbid(unsafe_code)]

//! Hierarchy queries over maintained paths.
//!
//! Every query is a prefix, range or depth comparison on the path field; none follows
//! parent references. Results are ordered by path with unset paths last, which is a
//! depth-first walk in sibling order. A node without a path has no relatives: collection
//! queries return nothing and the yes/no queries return `None`.

use std::collections::HashSet;

use crate::error::Result;
use crate::model::Node;
use crate::path::{self, Path};
use crate::store::{NodeSource, Predicate};

/// Sorts nodes by path, unset paths last, ties by id.
pub fn sort_by_path(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        path::compare(a.path.as_ref(), b.path.as_ref()).then_with(|| a.id.cmp(&b.id))
    });
}

/// Returns `true` when `a` is an ancestor of `b`; `false` if either path is unset.
pub fn is_ancestor_of(a: &Node, b: &Node, include_self: bool) -> bool {
    match (&a.path, &b.path) {
        (Some(a), Some(b)) => a.is_ancestor_of(b, include_self),
        _ => false,
    }
}

/// Returns `true` when `a` is a descendant of `b`; `false` if either path is unset.
pub fn is_descendant_of(a: &Node, b: &Node, include_self: bool) -> bool {
    is_ancestor_of(b, a, include_self)
}

/// Read-only queries over any [`NodeSource`].
#[derive(Debug)]
pub struct TreeQuery<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S: ?Sized> Clone for TreeQuery<'a, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, S: ?Sized> Copy for TreeQuery<'a, S> {}

impl<'a, S: NodeSource + ?Sized> TreeQuery<'a, S> {
    /// Queries over `source`.
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    fn sorted(&self, predicate: &Predicate) -> Result<Vec<Node>> {
        let mut nodes = self.source.filter(predicate)?;
        sort_by_path(&mut nodes);
        Ok(nodes)
    }

    /// Every node, ordered by path.
    pub fn all(&self) -> Result<Vec<Node>> {
        self.sorted(&Predicate::All)
    }

    /// Nodes at depth 1.
    pub fn roots(&self) -> Result<Vec<Node>> {
        self.sorted(&Predicate::ChildrenOf(Path::root()))
    }

    /// Nodes at `depth`, 1 being the roots.
    pub fn at_depth(&self, depth: usize) -> Result<Vec<Node>> {
        self.sorted(&Predicate::Depth(depth))
    }

    /// Nodes whose path has not been computed yet.
    pub fn unplaced(&self) -> Result<Vec<Node>> {
        let mut nodes = self.source.filter(&Predicate::PathIsNull)?;
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    /// Direct children.
    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        match &node.path {
            Some(own) => self.sorted(&Predicate::ChildrenOf(own.clone())),
            None => Ok(Vec::new()),
        }
    }

    /// Ancestors from the root down.
    pub fn ancestors(&self, node: &Node, include_self: bool) -> Result<Vec<Node>> {
        match &node.path {
            Some(own) => self.sorted(&Predicate::AncestorOf {
                path: own.clone(),
                inclusive: include_self,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// The whole subtree in depth-first order.
    pub fn descendants(&self, node: &Node, include_self: bool) -> Result<Vec<Node>> {
        match &node.path {
            Some(own) => self.sorted(&Predicate::DescendantOf {
                path: own.clone(),
                inclusive: include_self,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Union of the subtrees of `nodes`, without duplicates.
    pub fn descendants_of_many(&self, nodes: &[Node], include_self: bool) -> Result<Vec<Node>> {
        let mut prefixes: Vec<&Path> = nodes.iter().filter_map(|n| n.path.as_ref()).collect();
        prefixes.sort();
        prefixes.dedup();
        // A subtree already covered by an ancestor in the list adds nothing.
        let mut kept: Vec<&Path> = Vec::new();
        for prefix in prefixes {
            if !kept.iter().any(|k| k.is_prefix_of(prefix, false)) {
                kept.push(prefix);
            }
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for prefix in kept {
            let subtree = self.source.filter(&Predicate::DescendantOf {
                path: prefix.clone(),
                inclusive: true,
            })?;
            for node in subtree {
                if seen.insert(node.id) {
                    out.push(node);
                }
            }
        }
        if !include_self {
            let own: HashSet<_> = nodes.iter().map(|n| n.id).collect();
            out.retain(|n| !own.contains(&n.id));
        }
        sort_by_path(&mut out);
        Ok(out)
    }

    /// Nodes sharing the node's parent prefix.
    pub fn siblings(&self, node: &Node, include_self: bool) -> Result<Vec<Node>> {
        let Some(own) = &node.path else {
            return Ok(Vec::new());
        };
        let mut group = self.sorted(&Predicate::ChildrenOf(own.sibling_prefix()))?;
        if !include_self {
            group.retain(|n| n.id != node.id);
        }
        Ok(group)
    }

    /// Siblings ordered before the node, closest first.
    pub fn prev_siblings(&self, node: &Node, include_self: bool) -> Result<Vec<Node>> {
        let Some(own) = &node.path else {
            return Ok(Vec::new());
        };
        let mut group = self.siblings(node, include_self)?;
        group.retain(|n| {
            n.path
                .as_ref()
                .is_some_and(|p| p < own || (include_self && p == own))
        });
        group.reverse();
        Ok(group)
    }

    /// Siblings ordered after the node.
    pub fn next_siblings(&self, node: &Node, include_self: bool) -> Result<Vec<Node>> {
        let Some(own) = &node.path else {
            return Ok(Vec::new());
        };
        let mut group = self.siblings(node, include_self)?;
        group.retain(|n| {
            n.path
                .as_ref()
                .is_some_and(|p| p > own || (include_self && p == own))
        });
        Ok(group)
    }

    /// The closest sibling before the node.
    pub fn prev_sibling(&self, node: &Node) -> Result<Option<Node>> {
        Ok(self.prev_siblings(node, false)?.into_iter().next())
    }

    /// The closest sibling after the node.
    pub fn next_sibling(&self, node: &Node) -> Result<Option<Node>> {
        Ok(self.next_siblings(node, false)?.into_iter().next())
    }

    /// Depth of the node, 1 for roots.
    pub fn level(&self, node: &Node) -> Option<usize> {
        node.path.as_ref().map(Path::depth)
    }

    /// Whether the node is a root.
    pub fn is_root(&self, node: &Node) -> Option<bool> {
        node.path.as_ref().map(Path::is_root)
    }

    /// Whether the node has no descendants.
    pub fn is_leaf(&self, node: &Node) -> Result<Option<bool>> {
        match &node.path {
            Some(own) => Ok(Some(!self.source.exists(&Predicate::DescendantOf {
                path: own.clone(),
                inclusive: false,
            })?)),
            None => Ok(None),
        }
    }

    /// Deepest node that is an ancestor of both (inclusive); `None` across trees or for
    /// unset paths.
    pub fn common_ancestor(&self, a: &Node, b: &Node) -> Result<Option<Node>> {
        let (Some(pa), Some(pb)) = (&a.path, &b.path) else {
            return Ok(None);
        };
        let shared = pa.common_ancestor(pb);
        if shared.is_empty() {
            return Ok(None);
        }
        Ok(self
            .source
            .filter(&Predicate::PathEquals(shared))?
            .into_iter()
            .min_by_key(|n| n.id))
    }
}
