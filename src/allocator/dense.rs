use super::{Allocation, Placement, Relabel, SiblingAllocator};
use crate::error::{Result, TreeError};
use crate::model::{Node, NodeId};
use crate::path::{Component, LabelFormat, Path};
use crate::rank::RankOrdering;

/// Numbers each group `0, 1, 2, …` in fixed-width labels.
#[derive(Debug, Clone, Default)]
pub struct DenseAllocator {
    format: LabelFormat,
}

impl DenseAllocator {
    /// Allocator for labels of `format`.
    pub fn new(format: LabelFormat) -> Self {
        Self { format }
    }

    fn check_capacity(&self, parent: Option<NodeId>, count: usize) -> Result<()> {
        let max = self.format.capacity();
        if count as u64 > max {
            return Err(TreeError::Capacity {
                parent,
                requested: count,
                max,
            });
        }
        Ok(())
    }
}

impl SiblingAllocator for DenseAllocator {
    fn allocate(&self, placement: Placement<'_>, ordering: &RankOrdering) -> Result<Allocation> {
        let node = placement.node;
        let mut group: Vec<Node> = placement
            .siblings
            .iter()
            .filter(|s| s.id != node.id)
            .cloned()
            .collect();
        group.push(node.clone());
        self.check_capacity(node.parent, group.len())?;
        ordering.sort(&mut group);

        let mut component = None;
        let mut relabels = Vec::new();
        for (rank, member) in group.into_iter().enumerate() {
            let label = Component::Label(rank as u64);
            if member.id == node.id {
                component = Some(label);
                continue;
            }
            let to = placement.parent_path.compose(label);
            if member.path.as_ref() != Some(&to) {
                relabels.push(Relabel {
                    id: member.id,
                    from: member.path,
                    to,
                });
            }
        }
        let component = component.ok_or_else(|| {
            TreeError::Corruption(format!("node {} vanished from its sibling group", node.id))
        })?;
        Ok(Allocation {
            component,
            relabels,
        })
    }

    fn sequence(&self, parent: Option<NodeId>, count: usize) -> Result<Vec<Component>> {
        self.check_capacity(parent, count)?;
        Ok((0..count as u64).map(Component::Label).collect())
    }

    fn compact(
        &self,
        parent_path: &Path,
        members: &[Node],
        ordering: &RankOrdering,
    ) -> Result<Vec<Relabel>> {
        let mut group = members.to_vec();
        ordering.sort(&mut group);
        Ok(group
            .into_iter()
            .enumerate()
            .filter_map(|(rank, member)| {
                let to = parent_path.compose(Component::Label(rank as u64));
                (member.path.as_ref() != Some(&to)).then(|| Relabel {
                    id: member.id,
                    from: member.path,
                    to,
                })
            })
            .collect())
    }
}
