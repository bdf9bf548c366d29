use std::cmp::Ordering;

use super::{Allocation, Placement, SiblingAllocator};
use crate::error::Result;
use crate::model::{Node, NodeId};
use crate::path::{Component, KeyFormat, Path, SparseKey};
use crate::rank::RankOrdering;

/// Places nodes between their neighbours' keys without moving anyone else.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseAllocator {
    format: KeyFormat,
}

impl SparseAllocator {
    /// Allocator stepping by `format.step`.
    pub fn new(format: KeyFormat) -> Self {
        Self { format }
    }
}

/// The node's own key, if its current path places it in the target group.
fn current_key(node: &Node, parent_path: &Path) -> Option<SparseKey> {
    let path = node.path.as_ref()?;
    if &path.sibling_prefix() != parent_path {
        return None;
    }
    path.last()?.as_key().copied()
}

impl SiblingAllocator for SparseAllocator {
    fn allocate(&self, placement: Placement<'_>, ordering: &RankOrdering) -> Result<Allocation> {
        let node = placement.node;
        let mut lower: Option<(&Node, SparseKey)> = None;
        let mut upper: Option<(&Node, SparseKey)> = None;
        for sibling in placement.siblings.iter().filter(|s| s.id != node.id) {
            let Some(key) = current_key(sibling, placement.parent_path) else {
                continue;
            };
            match ordering.compare(sibling, node) {
                Ordering::Less => {
                    if lower.map_or(true, |(best, _)| ordering.compare(sibling, best).is_gt()) {
                        lower = Some((sibling, key));
                    }
                }
                _ => {
                    if upper.map_or(true, |(best, _)| ordering.compare(sibling, best).is_lt()) {
                        upper = Some((sibling, key));
                    }
                }
            }
        }
        let lower = lower.map(|(_, key)| key);
        let upper = upper.map(|(_, key)| key);

        if placement.parent_unchanged {
            if let Some(own) = current_key(node, placement.parent_path) {
                let above = lower.map_or(true, |low| low < own);
                let below = upper.map_or(true, |high| own < high);
                if above && below {
                    return Ok(Allocation {
                        component: Component::Key(own),
                        relabels: Vec::new(),
                    });
                }
            }
        }

        let key = match (lower, upper) {
            (None, None) => SparseKey::ZERO,
            (Some(low), None) => low.offset(self.format.step)?,
            (None, Some(high)) => high.offset(-self.format.step)?,
            (Some(low), Some(high)) => low.midpoint(&high)?,
        };
        Ok(Allocation {
            component: Component::Key(key),
            relabels: Vec::new(),
        })
    }

    fn sequence(&self, _parent: Option<NodeId>, count: usize) -> Result<Vec<Component>> {
        let mut key = SparseKey::ZERO;
        let mut components = Vec::with_capacity(count);
        for idx in 0..count {
            if idx > 0 {
                key = key.offset(self.format.step)?;
            }
            components.push(Component::Key(key));
        }
        Ok(components)
    }
}
