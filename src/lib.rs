//! Sendero keeps materialized paths correct for trees stored in relational tables.
//!
//! Each node row carries a parent reference and a path field encoding its position
//! from the root. The [`TreeEngine`] updates paths on every insert, move, rank change
//! and delete, so that hierarchy queries ([`TreeQuery`]) are single prefix, range or
//! depth comparisons and ordering by path yields a depth-first walk in sibling order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod path;
pub mod query;
pub mod rank;
pub mod store;
pub mod verify;

pub use config::{Direction, GapPolicy, OrphanPolicy, PathConfig, RankKey};
pub use engine::{RebuildReport, TreeEngine};
pub use error::{Result, TreeError};
pub use model::{Attributes, NewNode, Node, NodeId, Value};
pub use path::{Component, Encoding, KeyFormat, LabelFormat, Path, SparseKey};
pub use query::TreeQuery;
pub use store::{
    MemoryDatabase, MemoryStore, NodeSource, NodeStore, Predicate, PrefixMove, SqliteSchema,
    SqliteStore, Transactional,
};
pub use verify::{VerifyFinding, VerifyReport, VerifySeverity};
