//! The path maintenance engine.
//!
//! [`TreeEngine`] is the only write path that keeps materialized paths correct. Every
//! mutation runs in one store transaction: the row write, the placement of the node
//! among its siblings, the subtree cascade and, for the label encoding, the relabelling
//! of shifted siblings. Any error rolls the whole mutation back.
//!
//! ```no_run
//! use sendero::{NewNode, PathConfig, SqliteStore, TreeEngine};
//!
//! let config = PathConfig::labels(2, ["name"])?;
//! let store = SqliteStore::open_with_config("places.db", &config)?;
//! let mut engine = TreeEngine::new(store, config)?;
//! let france = engine.insert(NewNode::root().with("name", "France"))?;
//! let normandie = engine.insert(NewNode::child_of(france.id).with("name", "Normandie"))?;
//! assert_eq!(engine.query().ancestors(&normandie, false)?.len(), 1);
//! # Ok::<(), sendero::TreeError>(())
//! ```

mod mutation;
mod rebuild;

pub use rebuild::RebuildReport;

use tracing::warn;

use crate::allocator::{self, SiblingAllocator};
use crate::config::PathConfig;
use crate::error::{Result, TreeError};
use crate::model::{NewNode, Node, NodeId, Value};
use crate::path::Path;
use crate::query::TreeQuery;
use crate::rank::RankOrdering;
use crate::store::{NodeStore, Transactional};
use crate::verify::{self, VerifyReport};

/// Maintains materialized paths over a node store.
pub struct TreeEngine<S> {
    store: S,
    config: PathConfig,
    ordering: RankOrdering,
    allocator: Box<dyn SiblingAllocator + Send + Sync>,
    maintenance: bool,
    /// Prefixes under which the open transaction wrote paths.
    written: Vec<Path>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for TreeEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeEngine")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("maintenance", &self.maintenance)
            .finish()
    }
}

impl<S: NodeStore + Transactional> TreeEngine<S> {
    /// Creates an engine over `store`. The store must hold paths in `config.encoding`.
    pub fn new(store: S, config: PathConfig) -> Result<Self> {
        config.validate()?;
        let ordering = RankOrdering::new(&config.order_by);
        let allocator = allocator::for_encoding(&config.encoding);
        Ok(Self {
            store,
            config,
            ordering,
            allocator,
            maintenance: true,
            written: Vec::new(),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// Sibling order in effect.
    pub fn ordering(&self) -> &RankOrdering {
        &self.ordering
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store. Writes made here bypass path maintenance.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Releases the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Read-only hierarchy queries over the maintained paths.
    pub fn query(&self) -> TreeQuery<'_, S> {
        TreeQuery::new(&self.store)
    }

    /// Fetches a node or fails with [`TreeError::NodeNotFound`].
    pub fn get(&self, id: NodeId) -> Result<Node> {
        self.store.get(id)?.ok_or(TreeError::NodeNotFound(id))
    }

    /// Checks the stored paths against the parent references.
    pub fn verify(&self) -> Result<VerifyReport> {
        verify::verify(&self.store, &self.config)
    }

    /// Returns `true` while mutations maintain paths.
    pub fn maintenance_enabled(&self) -> bool {
        self.maintenance
    }

    /// Stops maintaining paths: rows are written verbatim, including raw paths, until
    /// [`enable_maintenance`](Self::enable_maintenance). Follow bulk imports with
    /// [`rebuild`](Self::rebuild).
    pub fn disable_maintenance(&mut self) {
        self.maintenance = false;
    }

    /// Resumes path maintenance.
    pub fn enable_maintenance(&mut self) {
        self.maintenance = true;
    }

    /// Runs `f` in one transaction with maintenance disabled, restoring the previous
    /// setting afterwards even when `f` fails.
    pub fn with_maintenance_disabled<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.maintenance;
        self.maintenance = false;
        let outcome = self.atomically(f);
        self.maintenance = previous;
        outcome
    }

    /// Inserts a node and places it among its siblings.
    pub fn insert(&mut self, node: NewNode) -> Result<Node> {
        self.atomically(|engine| engine.apply_insert(node))
    }

    /// Inserts several nodes in one transaction. Returns them as stored at commit, so
    /// labels reflect later inserts into the same groups.
    pub fn insert_many(&mut self, nodes: impl IntoIterator<Item = NewNode>) -> Result<Vec<Node>> {
        self.atomically(|engine| {
            let mut ids = Vec::new();
            for node in nodes {
                ids.push(engine.apply_insert(node)?.id);
            }
            ids.into_iter().map(|id| engine.get(id)).collect()
        })
    }

    /// Writes a modified node. Path work happens only when the parent or a rank field
    /// changed; the path carried by `node` is ignored while maintenance is enabled.
    pub fn save(&mut self, node: Node) -> Result<Node> {
        self.atomically(|engine| engine.apply_update(node))
    }

    /// Reparents a node, moving its whole subtree.
    pub fn move_node(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<Node> {
        self.atomically(|engine| {
            let mut node = engine.get(id)?;
            node.parent = parent;
            engine.apply_update(node)
        })
    }

    /// Sets one attribute, re-ranking the node if the field is a rank field.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Node> {
        let value = value.into();
        self.atomically(|engine| {
            let mut node = engine.get(id)?;
            node.set(field, value);
            engine.apply_update(node)
        })
    }

    /// Deletes a node and its subtree. Returns the removed ids.
    pub fn delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.atomically(|engine| engine.apply_delete(id))
    }

    /// Runs `f` in one transaction (a savepoint when nested). The outermost level checks
    /// the paths it wrote for uniqueness before committing while maintenance is enabled.
    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.store.begin()?;
        let level = self.store.depth();
        if level == 1 {
            self.written.clear();
        }
        let outcome = f(self).and_then(|value| {
            if level == 1 && self.maintenance {
                self.ensure_unique_paths()?;
            }
            self.store.commit()?;
            Ok(value)
        });
        if let Err(err) = &outcome {
            if self.store.depth() >= level {
                warn!(error = %err, level, "engine.rollback");
                if let Err(rollback) = self.store.rollback() {
                    warn!(error = %rollback, "engine.rollback_failed");
                }
            }
        }
        if level == 1 {
            self.written.clear();
        }
        outcome
    }

    /// Records that every path at or below `prefix` may have changed.
    fn wrote_under(&mut self, prefix: Path) {
        self.written.push(prefix);
    }

    fn ensure_unique_paths(&self) -> Result<()> {
        let scope = covering_prefixes(&self.written);
        if scope.is_empty() {
            return Ok(());
        }
        let Some((path, nodes)) = self.store.duplicate_paths(&scope)?.into_iter().next() else {
            return Ok(());
        };
        let path = self
            .config
            .encoding
            .format(&path)
            .unwrap_or_else(|_| format!("{path:?}"));
        Err(TreeError::DuplicatePath { path, nodes })
    }
}

/// Smallest set of prefixes with every path in `paths` at or below one of them.
fn covering_prefixes(paths: &[Path]) -> Vec<Path> {
    let mut sorted: Vec<&Path> = paths.iter().collect();
    sorted.sort_unstable();
    let mut cover: Vec<Path> = Vec::new();
    for path in sorted {
        // Extensions of a prefix sort right after it.
        if cover.last().is_some_and(|last| last.is_prefix_of(path, true)) {
            continue;
        }
        cover.push(path.clone());
    }
    cover
}
