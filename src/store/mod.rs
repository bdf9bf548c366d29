//! Node store collaborators.
//!
//! The engine never talks to a database directly. It reads rows through [`NodeSource`],
//! writes them through [`NodeStore`] and brackets every mutation with [`Transactional`].
//!
//! # Isolation
//!
//! Path maintenance reads a sibling group and then rewrites it, so a store must serialize
//! transactions that touch the same group: either by taking a writer lock when the
//! transaction begins, or by failing one of two conflicting transactions with
//! [`TreeError::Conflict`](crate::TreeError::Conflict). Both bundled stores take a
//! writer lock at `begin`.

mod memory;
mod predicate;
mod sqlite;

pub use memory::{MemoryDatabase, MemoryStore};
pub use predicate::Predicate;
pub use sqlite::{SqliteSchema, SqliteStore, DEFAULT_TABLE};

use tracing::warn;

use crate::config::OrphanPolicy;
use crate::error::Result;
use crate::model::{NewNode, Node, NodeId};
use crate::path::{Encoding, Path};
use crate::rank::RankOrdering;

/// Replaces the prefix `from` with `to` on every row at or below `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMove {
    /// Old prefix.
    pub from: Path,
    /// New prefix.
    pub to: Path,
}

/// Inputs of a set-based rebuild.
#[derive(Debug, Clone, Copy)]
pub struct RebuildPlan<'a> {
    /// Encoding of the rebuilt paths.
    pub encoding: &'a Encoding,
    /// Sibling order.
    pub ordering: &'a RankOrdering,
    /// Handling of dangling parent references.
    pub orphans: OrphanPolicy,
}

/// Read access to nodes.
pub trait NodeSource {
    /// Fetches one node.
    fn get(&self, id: NodeId) -> Result<Option<Node>>;

    /// Returns every node matching `predicate`, in no particular order.
    fn filter(&self, predicate: &Predicate) -> Result<Vec<Node>>;

    /// Returns `true` when at least one node matches.
    fn exists(&self, predicate: &Predicate) -> Result<bool> {
        Ok(!self.filter(predicate)?.is_empty())
    }
}

impl NodeSource for [Node] {
    fn get(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.iter().find(|node| node.id == id).cloned())
    }

    fn filter(&self, predicate: &Predicate) -> Result<Vec<Node>> {
        Ok(self
            .iter()
            .filter(|node| predicate.matches(node))
            .cloned()
            .collect())
    }

    fn exists(&self, predicate: &Predicate) -> Result<bool> {
        Ok(self.iter().any(|node| predicate.matches(node)))
    }
}

impl NodeSource for Vec<Node> {
    fn get(&self, id: NodeId) -> Result<Option<Node>> {
        NodeSource::get(self.as_slice(), id)
    }

    fn filter(&self, predicate: &Predicate) -> Result<Vec<Node>> {
        self.as_slice().filter(predicate)
    }

    fn exists(&self, predicate: &Predicate) -> Result<bool> {
        self.as_slice().exists(predicate)
    }
}

/// Write access to nodes.
pub trait NodeStore: NodeSource {
    /// Inserts a row and returns it with its assigned id. A missing parent fails with
    /// [`TreeError::NodeNotFound`](crate::TreeError::NodeNotFound).
    fn insert(&mut self, node: NewNode) -> Result<Node>;

    /// Overwrites the parent reference, attributes and path of an existing row. A missing
    /// parent fails with [`TreeError::Integrity`](crate::TreeError::Integrity).
    fn update(&mut self, node: &Node) -> Result<()>;

    /// Deletes a row and, by cascade, its whole subtree. Returns the removed ids.
    fn delete(&mut self, id: NodeId) -> Result<Vec<NodeId>>;

    /// Sets the path of each listed row.
    fn set_paths(&mut self, paths: &[(NodeId, Option<Path>)]) -> Result<()>;

    /// Applies every move at once: each row at or below some `from` takes the `to` of the
    /// longest matching `from`, keeping the rest of its path. Returns the rows changed.
    fn rewrite_prefixes(&mut self, moves: &[PrefixMove]) -> Result<usize>;

    /// Paths held by more than one row, looking only at rows at or below one of
    /// `prefixes`. The root prefix covers every row.
    fn duplicate_paths(&self, prefixes: &[Path]) -> Result<Vec<(Path, Vec<NodeId>)>>;

    /// Recomputes every path in one set-based pass. Stores without such a pass return
    /// `None` and the engine rebuilds node by node.
    fn rebuild_paths(&mut self, _plan: &RebuildPlan<'_>) -> Result<Option<usize>> {
        Ok(None)
    }
}

/// Transaction control.
///
/// `begin` may nest; inner levels behave like savepoints. Only the outermost `commit`
/// makes changes visible to other connections.
pub trait Transactional {
    /// Opens a transaction or savepoint.
    fn begin(&mut self) -> Result<()>;

    /// Commits the innermost level.
    fn commit(&mut self) -> Result<()>;

    /// Rolls the innermost level back.
    fn rollback(&mut self) -> Result<()>;

    /// Number of open levels.
    fn depth(&self) -> usize;

    /// Returns `true` inside a transaction.
    fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    /// Runs `f` in its own level, committing on success and rolling back on error.
    fn run_atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin()?;
        let outcome = f(self).and_then(|value| self.commit().map(|()| value));
        if outcome.is_err() && self.depth() > 0 {
            if let Err(err) = self.rollback() {
                warn!(error = %err, "store.rollback_failed");
            }
        }
        outcome
    }
}

/// Applies a batch of prefix moves to one path, longest matching prefix first.
pub(crate) fn apply_moves(path: &Path, moves: &[PrefixMove]) -> Option<Path> {
    moves
        .iter()
        .filter(|mv| mv.from.is_prefix_of(path, true))
        .max_by_key(|mv| mv.from.depth())
        .and_then(|mv| path.with_prefix_replaced(&mv.from, &mv.to))
}
