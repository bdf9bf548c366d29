//! Insert, update and delete handling.

use tracing::{debug, trace};

use super::TreeEngine;
use crate::allocator::{Placement, Relabel};
use crate::config::GapPolicy;
use crate::error::{Result, TreeError};
use crate::model::{NewNode, Node, NodeId};
use crate::path::Path;
use crate::store::{NodeStore, Predicate, PrefixMove, Transactional};

impl<S: NodeStore + Transactional> TreeEngine<S> {
    pub(super) fn apply_insert(&mut self, node: NewNode) -> Result<Node> {
        if !self.maintenance {
            return self.store.insert(node);
        }
        if let Some(parent) = node.parent {
            if self.store.get(parent)?.is_none() {
                return Err(TreeError::NodeNotFound(parent));
            }
        }
        let mut node = self.store.insert(NewNode { path: None, ..node })?;
        self.place(&mut node, None, &mut Vec::new())?;
        debug!(node = node.id, parent = ?node.parent, "engine.insert");
        Ok(node)
    }

    pub(super) fn apply_update(&mut self, mut node: Node) -> Result<Node> {
        let stored = self.get(node.id)?;
        if !self.maintenance {
            self.store.update(&node)?;
            return Ok(node);
        }
        if let Some(parent) = node.parent {
            if self.store.get(parent)?.is_none() {
                return Err(TreeError::NodeNotFound(parent));
            }
        }
        node.path = stored.path.clone();
        let parent_changed = stored.parent != node.parent;
        let rank_changed = self.ordering.rank_changed(&stored, &node);
        self.store.update(&node)?;
        if !parent_changed && !rank_changed {
            trace!(node = node.id, "engine.update.no_path_work");
            return Ok(node);
        }
        self.place(&mut node, Some(&stored), &mut Vec::new())?;
        if parent_changed && self.config.gaps == GapPolicy::Compact {
            self.compact_group(stored.parent)?;
            node = self.get(node.id)?;
        }
        debug!(
            node = node.id,
            parent_changed,
            rank_changed,
            "engine.update"
        );
        Ok(node)
    }

    pub(super) fn apply_delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.get(id)?;
        let removed = self.store.delete(id)?;
        if self.maintenance && self.config.gaps == GapPolicy::Compact {
            self.compact_group(node.parent)?;
        }
        debug!(node = id, removed = removed.len(), "engine.delete");
        Ok(removed)
    }

    /// Computes and persists the node's path, cascading to its subtree and to relabelled
    /// siblings. `node` is already stored with its new parent and attributes and carries
    /// its current path; `previous` is the stored row before the update.
    pub(super) fn place(
        &mut self,
        node: &mut Node,
        previous: Option<&Node>,
        visiting: &mut Vec<NodeId>,
    ) -> Result<()> {
        visiting.push(node.id);
        let parent_path = self.parent_path(node, visiting)?;
        let siblings = self.store.filter(&Predicate::ParentIs(node.parent))?;
        let allocation = self.allocator.allocate(
            Placement {
                node,
                parent_path: &parent_path,
                siblings: &siblings,
                parent_unchanged: previous.is_some_and(|p| p.parent == node.parent),
            },
            &self.ordering,
        )?;
        let new_path = parent_path.compose(allocation.component);
        if node.path.as_ref() == Some(&new_path) && allocation.relabels.is_empty() {
            trace!(node = node.id, "engine.place.unchanged");
            return Ok(());
        }

        let mut relabels = allocation.relabels;
        relabels.push(Relabel {
            id: node.id,
            from: node.path.take(),
            to: new_path.clone(),
        });
        self.apply_relabels(relabels)?;
        node.path = Some(new_path);
        Ok(())
    }

    /// Path of the node's new parent, placing path-less ancestors first.
    fn parent_path(&mut self, node: &Node, visiting: &mut Vec<NodeId>) -> Result<Path> {
        let Some(parent_id) = node.parent else {
            return Ok(Path::root());
        };
        let cycle = TreeError::Cycle {
            node: node.id,
            parent: parent_id,
        };
        if visiting.contains(&parent_id) {
            return Err(cycle);
        }
        let mut parent = self.get(parent_id)?;
        let parent_path = match parent.path.clone() {
            Some(path) => path,
            None => {
                debug!(node = node.id, parent = parent_id, "engine.place.force_parent");
                self.place(&mut parent, None, visiting)?;
                parent.path.clone().ok_or_else(|| {
                    TreeError::Corruption(format!("node {parent_id} could not be placed"))
                })?
            }
        };
        match &node.path {
            Some(own) if own.is_prefix_of(&parent_path, true) => return Err(cycle),
            Some(_) => {}
            None => self.check_ancestry(node.id, parent_id)?,
        }
        Ok(parent_path)
    }

    /// Walks parent references from `parent` up to a root, failing if `node` is met.
    /// Only needed for nodes without a path, whose subtree cannot be found by prefix.
    fn check_ancestry(&self, node: NodeId, parent: NodeId) -> Result<()> {
        let mut seen = vec![node];
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if seen.contains(&id) {
                return Err(TreeError::Cycle { node, parent });
            }
            seen.push(id);
            cursor = self.store.get(id)?.and_then(|n| n.parent);
        }
        Ok(())
    }

    /// Renumbers the group under `parent` after one of its members left.
    fn compact_group(&mut self, parent: Option<NodeId>) -> Result<()> {
        let parent_path = match parent {
            None => Path::root(),
            Some(id) => match self.store.get(id)?.and_then(|n| n.path) {
                Some(path) => path,
                None => return Ok(()),
            },
        };
        let members = self.store.filter(&Predicate::ParentIs(parent))?;
        let relabels = self
            .allocator
            .compact(&parent_path, &members, &self.ordering)?;
        if !relabels.is_empty() {
            debug!(parent = ?parent, relabels = relabels.len(), "engine.compact");
        }
        self.apply_relabels(relabels)
    }

    /// Persists relabels: rows with a path move with their subtree in one simultaneous
    /// rewrite, rows without one get their path set afterwards.
    fn apply_relabels(&mut self, relabels: Vec<Relabel>) -> Result<()> {
        let mut moves = Vec::new();
        let mut direct = Vec::new();
        for relabel in relabels {
            match relabel.from {
                Some(from) if from == relabel.to => {}
                Some(from) => {
                    self.wrote_under(relabel.to.clone());
                    moves.push(PrefixMove {
                        from,
                        to: relabel.to,
                    });
                }
                None => {
                    self.wrote_under(relabel.to.clone());
                    direct.push((relabel.id, Some(relabel.to)));
                }
            }
        }
        if !moves.is_empty() {
            self.store.rewrite_prefixes(&moves)?;
        }
        if !direct.is_empty() {
            self.store.set_paths(&direct)?;
        }
        Ok(())
    }
}
