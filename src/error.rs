//! Error type shared by the engine, the stores and the codecs.

use std::io;

use rusqlite::ErrorCode;
use thiserror::Error;
use tracing::warn;

use crate::model::NodeId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors raised while maintaining or querying materialized paths.
///
/// Every variant aborts the enclosing transaction. Only [`TreeError::Conflict`] is
/// worth retrying, and only by redoing the whole mutation with fresh data.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A move would make a node its own ancestor.
    #[error("cannot set node {node} or one of its descendants ({parent}) as its parent")]
    Cycle {
        /// Node being moved.
        node: NodeId,
        /// Requested parent.
        parent: NodeId,
    },
    /// A sibling group outgrew the fixed-width label encoding.
    #[error(
        "sibling group {} would hold {requested} nodes but the label encoding allows {max}; \
         widen the encoding then rebuild",
        group_name(.parent)
    )]
    Capacity {
        /// Parent of the group, `None` for the roots.
        parent: Option<NodeId>,
        /// Group size that was requested.
        requested: usize,
        /// Maximum group size, `radix ^ width`.
        max: u64,
    },
    /// A node references a parent that does not exist.
    #[error("node {node} references missing parent {parent}")]
    Integrity {
        /// Orphaned node.
        node: NodeId,
        /// Dangling parent reference.
        parent: NodeId,
    },
    /// Two nodes share a path at commit time.
    #[error("path {path} is shared by nodes {nodes:?}")]
    DuplicatePath {
        /// Text form of the duplicated path.
        path: String,
        /// Nodes holding it.
        nodes: Vec<NodeId>,
    },
    /// The store refused the transaction because of a concurrent writer.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    /// No sparse key with the supported precision fits between two neighbours.
    #[error("no key fits between {low} and {high}; rebuild the tree to respace keys")]
    KeyPrecision {
        /// Lower neighbour key.
        low: String,
        /// Upper neighbour key.
        high: String,
    },
    /// The requested node does not exist.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// A path value could not be decoded.
    #[error("invalid path {text:?}: {reason}")]
    InvalidPath {
        /// Offending text.
        text: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The path field configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Stored structure is inconsistent beyond what the engine can repair.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Error reported by SQLite.
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
    /// Attribute (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TreeError {
    /// Returns `true` when redoing the whole mutation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TreeError::Conflict(_))
    }

    /// Returns `true` for errors caused by the requested mutation itself.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TreeError::Cycle { .. }
                | TreeError::Capacity { .. }
                | TreeError::KeyPrecision { .. }
                | TreeError::NodeNotFound(_)
        )
    }

    pub(crate) fn invalid_path(text: impl Into<String>, reason: impl Into<String>) -> Self {
        TreeError::InvalidPath {
            text: text.into(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for TreeError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                warn!(error = %err, "store.sqlite.busy");
                TreeError::Conflict(err.to_string())
            }
            _ => TreeError::Sqlite(err),
        }
    }
}

fn group_name(parent: &Option<NodeId>) -> String {
    match parent {
        Some(id) => format!("under node {id}"),
        None => "of roots".to_string(),
    }
}
