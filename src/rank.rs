//! Sibling ordering from rank attributes.

use std::cmp::Ordering;

use crate::config::{Direction, RankKey};
use crate::model::{Node, ID_FIELDS};

/// Total order over siblings: the configured rank keys, then the node id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RankOrdering {
    keys: Vec<RankKey>,
}

impl RankOrdering {
    /// Builds an ordering, appending the id tie-break unless `id`/`pk` is already ranked.
    pub fn new(keys: &[RankKey]) -> Self {
        let mut keys = keys.to_vec();
        if !keys.iter().any(|k| ID_FIELDS.contains(&k.field.as_str())) {
            keys.push(RankKey::asc("id"));
        }
        Self { keys }
    }

    /// Rank keys including the tie-break.
    pub fn keys(&self) -> &[RankKey] {
        &self.keys
    }

    /// Attribute fields whose change can move a node among its siblings.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys
            .iter()
            .map(|k| k.field.as_str())
            .filter(|f| !ID_FIELDS.contains(f))
    }

    /// Compares two nodes in sibling order.
    pub fn compare(&self, a: &Node, b: &Node) -> Ordering {
        for key in &self.keys {
            let ord = a
                .rank_value(&key.field)
                .rank_cmp(&b.rank_value(&key.field));
            let ord = match key.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }

    /// Sorts `nodes` in sibling order.
    pub fn sort(&self, nodes: &mut [Node]) {
        nodes.sort_by(|a, b| self.compare(a, b));
    }

    /// Returns `true` when a rank field differs between two versions of a node.
    pub fn rank_changed(&self, before: &Node, after: &Node) -> bool {
        self.fields()
            .any(|field| before.attribute(field).rank_cmp(after.attribute(field)) != Ordering::Equal)
    }
}
