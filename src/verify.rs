//! Integrity checks over stored paths.
//!
//! [`verify`] compares every stored path with what the parent references and rank
//! attributes imply, without writing anything. It reports:
//!
//! - paths that do not extend their parent's path by one component (structure),
//! - paths shared by several nodes (uniqueness),
//! - sibling groups whose path order disagrees with rank order,
//! - parent references that dangle or form cycles,
//! - label groups larger than the encoding allows,
//! - nodes without a path, as warnings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::config::PathConfig;
use crate::error::Result;
use crate::model::{Node, NodeId};
use crate::store::{NodeSource, Predicate};
use crate::rank::RankOrdering;

const MAX_FINDINGS: usize = 32;

/// Severity of a finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Worth knowing, not a violation.
    Warning,
    /// A violated invariant; a rebuild is required.
    Error,
}

/// One problem found during verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyFinding {
    /// How serious the problem is.
    pub severity: VerifySeverity,
    /// Node the finding is about, when there is one.
    pub node: Option<NodeId>,
    /// Human-readable description.
    pub message: String,
}

/// Totals gathered during verification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerifyCounts {
    /// Nodes scanned.
    pub nodes: u64,
    /// Nodes without a parent reference.
    pub roots: u64,
    /// Nodes without a path.
    pub unset_paths: u64,
    /// Deepest stored path.
    pub max_depth: u64,
    /// Largest sibling group.
    pub largest_group: u64,
}

/// Result of [`verify`].
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// `true` when no error-level finding was recorded.
    pub success: bool,
    /// Findings, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Totals.
    pub counts: VerifyCounts,
}

impl VerifyReport {
    /// Error-level findings.
    pub fn errors(&self) -> impl Iterator<Item = &VerifyFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == VerifySeverity::Error)
    }
}

#[derive(Default)]
struct Findings {
    items: Vec<VerifyFinding>,
    errors: usize,
}

impl Findings {
    fn push(&mut self, severity: VerifySeverity, node: Option<NodeId>, message: String) {
        if severity == VerifySeverity::Error {
            self.errors += 1;
        }
        if self.items.len() < MAX_FINDINGS {
            self.items.push(VerifyFinding {
                severity,
                node,
                message,
            });
        }
    }

    fn error(&mut self, node: NodeId, message: String) {
        self.push(VerifySeverity::Error, Some(node), message);
    }
}

/// Checks the paths held by `source` against `config`.
pub fn verify<S: NodeSource + ?Sized>(source: &S, config: &PathConfig) -> Result<VerifyReport> {
    let ordering = RankOrdering::new(&config.order_by);
    let nodes: BTreeMap<NodeId, Node> = source
        .filter(&Predicate::All)?
        .into_iter()
        .map(|n| (n.id, n))
        .collect();
    let mut findings = Findings::default();
    let mut counts = VerifyCounts {
        nodes: nodes.len() as u64,
        ..VerifyCounts::default()
    };
    let mut groups: HashMap<Option<NodeId>, Vec<&Node>> = HashMap::new();
    let mut by_path: BTreeMap<_, Vec<NodeId>> = BTreeMap::new();

    for node in nodes.values() {
        groups.entry(node.parent).or_default().push(node);
        if node.parent.is_none() {
            counts.roots += 1;
        }
        let Some(path) = &node.path else {
            counts.unset_paths += 1;
            findings.push(
                VerifySeverity::Warning,
                Some(node.id),
                format!("node {} has no path", node.id),
            );
            continue;
        };
        counts.max_depth = counts.max_depth.max(path.depth() as u64);
        by_path.entry(path).or_default().push(node.id);

        match node.parent {
            None if !path.is_root() => findings.error(
                node.id,
                format!("root node {} has a path of depth {}", node.id, path.depth()),
            ),
            None => {}
            Some(parent_id) => match nodes.get(&parent_id) {
                None => findings.error(
                    node.id,
                    format!("node {} references missing parent {parent_id}", node.id),
                ),
                Some(parent) => match &parent.path {
                    Some(parent_path) if path.is_child_of(parent_path) => {}
                    Some(_) => findings.error(
                        node.id,
                        format!(
                            "path of node {} does not extend the path of its parent {parent_id}",
                            node.id
                        ),
                    ),
                    None => findings.error(
                        node.id,
                        format!("node {} has a path but its parent {parent_id} has none", node.id),
                    ),
                },
            },
        }
    }

    for (path, ids) in &by_path {
        if ids.len() > 1 {
            let text = config
                .encoding
                .format(path)
                .unwrap_or_else(|_| format!("{path:?}"));
            findings.error(ids[0], format!("path {text} is shared by nodes {ids:?}"));
        }
    }

    let capacity = config.encoding.capacity();
    for (parent, members) in &groups {
        counts.largest_group = counts.largest_group.max(members.len() as u64);
        if let Some(max) = capacity {
            if members.len() as u64 > max {
                let node = parent.unwrap_or(members[0].id);
                findings.error(
                    node,
                    format!(
                        "sibling group of {} holds {} nodes, more than the {max} labels available",
                        parent.map_or("the roots".to_string(), |p| format!("node {p}")),
                        members.len()
                    ),
                );
            }
        }
        check_group_order(members, &ordering, &mut findings);
    }

    check_cycles(&nodes, &mut findings);

    Ok(VerifyReport {
        success: findings.errors == 0,
        findings: findings.items,
        counts,
    })
}

fn check_group_order(members: &[&Node], ordering: &RankOrdering, findings: &mut Findings) {
    let mut placed: Vec<&Node> = members.iter().copied().filter(|n| n.path.is_some()).collect();
    placed.sort_by(|a, b| ordering.compare(a, b));
    for pair in placed.windows(2) {
        if crate::path::compare(pair[0].path.as_ref(), pair[1].path.as_ref()) != Ordering::Less {
            findings.error(
                pair[1].id,
                format!(
                    "node {} ranks after node {} but its path does not sort after it",
                    pair[1].id, pair[0].id
                ),
            );
        }
    }
}

fn check_cycles(nodes: &BTreeMap<NodeId, Node>, findings: &mut Findings) {
    let mut acyclic: HashSet<NodeId> = HashSet::new();
    for start in nodes.keys() {
        let mut trail = Vec::new();
        let mut cursor = Some(*start);
        while let Some(id) = cursor {
            if acyclic.contains(&id) {
                break;
            }
            if trail.contains(&id) {
                findings.error(id, format!("parent references of node {id} form a cycle"));
                break;
            }
            trail.push(id);
            cursor = nodes.get(&id).and_then(|n| n.parent);
        }
        acyclic.extend(trail);
    }
}
