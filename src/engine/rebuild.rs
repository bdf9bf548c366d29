//! Full and partial path recomputation.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{info, warn};

use super::TreeEngine;
use crate::config::OrphanPolicy;
use crate::error::{Result, TreeError};
use crate::model::{Node, NodeId};
use crate::path::Path;
use crate::store::{NodeStore, Predicate, RebuildPlan, Transactional};

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Nodes that received a path.
    pub nodes: usize,
    /// `true` when the store recomputed paths in one set-based statement.
    pub set_based: bool,
    /// Nodes placed among the roots because their parent no longer exists. Set-based
    /// rebuilds place them without listing them.
    pub orphans_as_roots: Vec<NodeId>,
}

impl<S: NodeStore + Transactional> TreeEngine<S> {
    /// Recomputes every path from parent references and rank attributes, ignoring the
    /// stored paths. Idempotent.
    pub fn rebuild(&mut self) -> Result<RebuildReport> {
        info!(encoding = ?self.config.encoding, "engine.rebuild.start");
        let report = self.atomically(|engine| {
            engine.wrote_under(Path::root());
            let plan = RebuildPlan {
                encoding: &engine.config.encoding,
                ordering: &engine.ordering,
                orphans: engine.config.orphans,
            };
            match engine.store.rebuild_paths(&plan)? {
                Some(nodes) => Ok(RebuildReport {
                    nodes,
                    set_based: true,
                    orphans_as_roots: Vec::new(),
                }),
                None => engine.rebuild_node_by_node(),
            }
        })?;
        info!(
            nodes = report.nodes,
            set_based = report.set_based,
            "engine.rebuild.done"
        );
        Ok(report)
    }

    /// Recomputes the paths below `id`, trusting the node's own path. A node without a
    /// path is placed first.
    pub fn rebuild_from(&mut self, id: NodeId) -> Result<RebuildReport> {
        self.atomically(|engine| {
            let mut root = engine.get(id)?;
            if root.path.is_none() {
                engine.place(&mut root, None, &mut Vec::new())?;
            }
            let prefix = root
                .path
                .clone()
                .ok_or_else(|| TreeError::Corruption(format!("node {id} could not be placed")))?;
            engine.wrote_under(prefix.clone());

            let mut paths = Vec::new();
            let mut seen = HashSet::from([id]);
            let mut queue = VecDeque::from([(id, prefix)]);
            while let Some((parent, prefix)) = queue.pop_front() {
                let mut group = engine.store.filter(&Predicate::ParentIs(Some(parent)))?;
                engine.ordering.sort(&mut group);
                let components = engine.allocator.sequence(Some(parent), group.len())?;
                for (child, component) in group.iter().zip(components) {
                    if !seen.insert(child.id) {
                        return Err(TreeError::Corruption(format!(
                            "node {} is reachable twice below node {id}",
                            child.id
                        )));
                    }
                    let path = prefix.compose(component);
                    queue.push_back((child.id, path.clone()));
                    paths.push((child.id, Some(path)));
                }
            }
            engine.store.set_paths(&paths)?;
            info!(node = id, nodes = paths.len(), "engine.rebuild_from");
            Ok(RebuildReport {
                nodes: paths.len(),
                set_based: false,
                orphans_as_roots: Vec::new(),
            })
        })
    }

    /// Breadth-first recomputation in memory, persisted in one bulk write.
    fn rebuild_node_by_node(&mut self) -> Result<RebuildReport> {
        let nodes = self.store.filter(&Predicate::All)?;
        let ids: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        let mut sorted = nodes;
        sorted.sort_by_key(|n| n.id);

        let mut orphans_as_roots = Vec::new();
        let mut groups: HashMap<Option<NodeId>, Vec<Node>> = HashMap::new();
        for node in sorted {
            let group = match node.parent {
                Some(parent) if !ids.contains(&parent) => match self.config.orphans {
                    OrphanPolicy::Strict => {
                        return Err(TreeError::Integrity {
                            node: node.id,
                            parent,
                        })
                    }
                    OrphanPolicy::AsRoot => {
                        warn!(node = node.id, parent, "engine.rebuild.orphan_as_root");
                        orphans_as_roots.push(node.id);
                        None
                    }
                },
                parent => parent,
            };
            groups.entry(group).or_default().push(node);
        }

        let mut paths: Vec<(NodeId, Option<Path>)> = Vec::with_capacity(ids.len());
        let mut queue = VecDeque::from([(None, Path::root())]);
        while let Some((parent, prefix)) = queue.pop_front() {
            let Some(mut group) = groups.remove(&parent) else {
                continue;
            };
            self.ordering.sort(&mut group);
            let components = self.allocator.sequence(parent, group.len())?;
            for (node, component) in group.iter().zip(components) {
                let path = prefix.compose(component);
                queue.push_back((Some(node.id), path.clone()));
                paths.push((node.id, Some(path)));
            }
        }
        if paths.len() != ids.len() {
            return Err(TreeError::Corruption(format!(
                "{} nodes are unreachable from any root; their parent references form a cycle",
                ids.len() - paths.len()
            )));
        }
        self.store.set_paths(&paths)?;
        Ok(RebuildReport {
            nodes: paths.len(),
            set_based: false,
            orphans_as_roots,
        })
    }
}
