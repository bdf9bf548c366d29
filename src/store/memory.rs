//! In-process node store.
//!
//! A [`MemoryDatabase`] holds the rows; each [`MemoryStore`] is a connection to it. A
//! transaction keeps the database mutex from `begin` until the outermost commit or
//! rollback, so transactions from different connections run one after another. Rollback
//! restores a snapshot taken at `begin`. Two connections used from the same thread
//! deadlock if one holds a transaction while the other reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::{debug, trace};

use super::{apply_moves, NodeSource, NodeStore, Predicate, PrefixMove, Transactional};
use crate::error::{Result, TreeError};
use crate::model::{NewNode, Node, NodeId};
use crate::path::Path;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: NodeId,
    rows: BTreeMap<NodeId, Node>,
}

impl MemoryState {
    fn check_parent(&self, node: NodeId, parent: Option<NodeId>) -> Result<()> {
        match parent {
            Some(parent) if !self.rows.contains_key(&parent) => {
                Err(TreeError::Integrity { node, parent })
            }
            _ => Ok(()),
        }
    }

    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for row in self.rows.values() {
            if let Some(parent) = row.parent {
                children.entry(parent).or_default().push(row.id);
            }
        }
        let mut removed = vec![root];
        let mut cursor = 0;
        while cursor < removed.len() {
            if let Some(kids) = children.get(&removed[cursor]) {
                let fresh: Vec<NodeId> = kids
                    .iter()
                    .copied()
                    .filter(|k| !removed.contains(k))
                    .collect();
                removed.extend(fresh);
            }
            cursor += 1;
        }
        removed
    }
}

/// Shared in-memory database. Cloning shares the rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection.
    pub fn connect(&self) -> MemoryStore {
        MemoryStore {
            shared: Arc::clone(&self.state),
            txn: None,
            snapshots: Vec::new(),
        }
    }
}

/// Connection to a [`MemoryDatabase`].
pub struct MemoryStore {
    shared: Arc<Mutex<MemoryState>>,
    txn: Option<ArcMutexGuard<RawMutex, MemoryState>>,
    snapshots: Vec<MemoryState>,
}

impl MemoryStore {
    /// A connection to a fresh private database.
    pub fn new() -> Self {
        MemoryDatabase::new().connect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.read(|state| state.rows.len())
    }

    /// Returns `true` when the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        match &self.txn {
            Some(guard) => f(guard),
            None => f(&self.shared.lock()),
        }
    }

    /// Applies `f` inside the open transaction, or in a private one when none is open.
    fn write<T>(&mut self, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        if let Some(guard) = self.txn.as_mut() {
            return f(guard);
        }
        let mut guard = self.shared.lock();
        let mut scratch = guard.clone();
        let value = f(&mut scratch)?;
        *guard = scratch;
        Ok(value)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("depth", &self.snapshots.len())
            .finish()
    }
}

impl NodeSource for MemoryStore {
    fn get(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.read(|state| state.rows.get(&id).cloned()))
    }

    fn filter(&self, predicate: &Predicate) -> Result<Vec<Node>> {
        Ok(self.read(|state| match predicate {
            Predicate::Id(id) => state.rows.get(id).cloned().into_iter().collect(),
            _ => state
                .rows
                .values()
                .filter(|node| predicate.matches(node))
                .cloned()
                .collect(),
        }))
    }
}

impl NodeStore for MemoryStore {
    fn insert(&mut self, node: NewNode) -> Result<Node> {
        self.write(|state| {
            let id = state.next_id + 1;
            if let Some(parent) = node.parent.filter(|p| !state.rows.contains_key(p)) {
                return Err(TreeError::NodeNotFound(parent));
            }
            state.next_id = id;
            let node = node.into_node(id);
            state.rows.insert(id, node.clone());
            trace!(node = id, "store.memory.insert");
            Ok(node)
        })
    }

    fn update(&mut self, node: &Node) -> Result<()> {
        self.write(|state| {
            if !state.rows.contains_key(&node.id) {
                return Err(TreeError::NodeNotFound(node.id));
            }
            state.check_parent(node.id, node.parent)?;
            state.rows.insert(node.id, node.clone());
            Ok(())
        })
    }

    fn delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.write(|state| {
            if !state.rows.contains_key(&id) {
                return Err(TreeError::NodeNotFound(id));
            }
            let removed = state.subtree(id);
            for row in &removed {
                state.rows.remove(row);
            }
            debug!(node = id, removed = removed.len(), "store.memory.cascade_delete");
            Ok(removed)
        })
    }

    fn set_paths(&mut self, paths: &[(NodeId, Option<Path>)]) -> Result<()> {
        self.write(|state| {
            for (id, path) in paths {
                let row = state.rows.get_mut(id).ok_or(TreeError::NodeNotFound(*id))?;
                row.path = path.clone();
            }
            Ok(())
        })
    }

    fn rewrite_prefixes(&mut self, moves: &[PrefixMove]) -> Result<usize> {
        if moves.is_empty() {
            return Ok(0);
        }
        self.write(|state| {
            let mut changed = 0;
            for row in state.rows.values_mut() {
                let Some(path) = row.path.as_ref() else {
                    continue;
                };
                if let Some(moved) = apply_moves(path, moves) {
                    if &moved != path {
                        row.path = Some(moved);
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        })
    }

    fn duplicate_paths(&self, prefixes: &[Path]) -> Result<Vec<(Path, Vec<NodeId>)>> {
        Ok(self.read(|state| {
            let mut by_path: BTreeMap<&Path, Vec<NodeId>> = BTreeMap::new();
            for row in state.rows.values() {
                let Some(path) = &row.path else {
                    continue;
                };
                if prefixes.iter().any(|prefix| prefix.is_prefix_of(path, true)) {
                    by_path.entry(path).or_default().push(row.id);
                }
            }
            by_path
                .into_iter()
                .filter(|(_, ids)| ids.len() > 1)
                .map(|(path, ids)| (path.clone(), ids))
                .collect()
        }))
    }
}

impl Transactional for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if self.txn.is_none() {
            self.txn = Some(self.shared.lock_arc());
        }
        if let Some(guard) = &self.txn {
            self.snapshots.push(MemoryState::clone(guard));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshots.pop().is_none() {
            return Err(TreeError::Corruption("commit without a transaction".into()));
        }
        if self.snapshots.is_empty() {
            self.txn = None;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshots
            .pop()
            .ok_or_else(|| TreeError::Corruption("rollback without a transaction".into()))?;
        if let Some(guard) = self.txn.as_mut() {
            **guard = snapshot;
        }
        if self.snapshots.is_empty() {
            self.txn = None;
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.snapshots.len()
    }
}
