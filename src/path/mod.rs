//! Path values and their codecs.
//!
//! A [`Path`] is the sequence of components from a root down to a node, one component per
//! level. Paths order lexicographically over components, with a prefix sorting before
//! its extensions, so sorting by path yields a depth-first walk in sibling order.
//! Ancestry is prefix containment.
//!
//! Components are either fixed-width alphanumeric labels ([`label`]) or exact sparse
//! keys ([`key`]); [`Encoding`] selects one and converts paths to and from text.

pub mod encoding;
pub mod key;
pub mod label;

use std::cmp::Ordering;

pub use encoding::{Encoding, KeyFormat};
pub use key::SparseKey;
pub use label::{from_alphanum, to_alphanum, LabelFormat, ALPHANUM, DEFAULT_MAX_SIBLINGS};

/// One level of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// Dense rank rendered as a fixed-width label.
    Label(u64),
    /// Sparse, densely orderable key.
    Key(SparseKey),
}

impl Component {
    /// Returns the label rank, if this is a label component.
    pub fn as_label(&self) -> Option<u64> {
        match self {
            Component::Label(rank) => Some(*rank),
            Component::Key(_) => None,
        }
    }

    /// Returns the sparse key, if this is a key component.
    pub fn as_key(&self) -> Option<&SparseKey> {
        match self {
            Component::Key(key) => Some(key),
            Component::Label(_) => None,
        }
    }
}

/// A materialized path.
///
/// The empty path is the common prefix of every root path; it is what a root's parent
/// resolves to and is never stored on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    components: Vec<Component>,
}

impl Path {
    /// The empty path, parent prefix of every root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from its components.
    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// Components from the root down.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Returns `true` for the empty path.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components; a root has depth 1.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Appends `component`.
    pub fn compose(&self, component: Component) -> Path {
        let mut components = Vec::with_capacity(self.components.len() + 1);
        components.extend_from_slice(&self.components);
        components.push(component);
        Path { components }
    }

    /// The path with its last component removed, `None` for root paths.
    pub fn parent(&self) -> Option<Path> {
        match self.components.len() {
            0 | 1 => None,
            n => Some(Path {
                components: self.components[..n - 1].to_vec(),
            }),
        }
    }

    /// The prefix shared by this path and its siblings: the parent path, or the empty
    /// path for roots.
    pub fn sibling_prefix(&self) -> Path {
        self.parent().unwrap_or_default()
    }

    /// Last component.
    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    /// Returns `true` when the path has a single component.
    pub fn is_root(&self) -> bool {
        self.components.len() == 1
    }

    /// Prefix containment. With `inclusive = false` the paths must also differ.
    pub fn is_prefix_of(&self, other: &Path, inclusive: bool) -> bool {
        if !other.components.starts_with(&self.components) {
            return false;
        }
        inclusive || self.components.len() < other.components.len()
    }

    /// Same as [`Path::is_prefix_of`], named for ancestry.
    pub fn is_ancestor_of(&self, other: &Path, include_self: bool) -> bool {
        self.is_prefix_of(other, include_self)
    }

    /// Converse of [`Path::is_ancestor_of`].
    pub fn is_descendant_of(&self, other: &Path, include_self: bool) -> bool {
        other.is_prefix_of(self, include_self)
    }

    /// Returns `true` when `self` is exactly one level below `other`.
    pub fn is_child_of(&self, other: &Path) -> bool {
        self.components.len() == other.components.len() + 1 && other.is_prefix_of(self, false)
    }

    /// All non-empty prefixes, shortest first; the path itself is last when
    /// `include_self` is set.
    pub fn ancestors(&self, include_self: bool) -> Vec<Path> {
        let end = if include_self {
            self.components.len()
        } else {
            self.components.len().saturating_sub(1)
        };
        (1..=end)
            .map(|len| Path {
                components: self.components[..len].to_vec(),
            })
            .collect()
    }

    /// The ancestor at `level` (1 is the root), `None` when deeper than the path.
    pub fn ancestor_at(&self, level: usize) -> Option<Path> {
        if level == 0 || level > self.components.len() {
            return None;
        }
        Some(Path {
            components: self.components[..level].to_vec(),
        })
    }

    /// Longest common prefix of two paths; empty when they sit in different trees.
    pub fn common_ancestor(&self, other: &Path) -> Path {
        let shared = self
            .components
            .iter()
            .zip(&other.components)
            .take_while(|(a, b)| a == b)
            .count();
        Path {
            components: self.components[..shared].to_vec(),
        }
    }

    /// Replaces the prefix `from` with `to`, keeping the remainder unchanged.
    /// Returns `None` when `from` is not an inclusive prefix of this path.
    pub fn with_prefix_replaced(&self, from: &Path, to: &Path) -> Option<Path> {
        if !from.is_prefix_of(self, true) {
            return None;
        }
        let mut components = Vec::with_capacity(to.depth() + self.depth() - from.depth());
        components.extend_from_slice(&to.components);
        components.extend_from_slice(&self.components[from.depth()..]);
        Some(Path { components })
    }
}

/// Orders possibly-unset paths with unset paths last.
///
/// Two unset paths compare equal here so that sorting is total; use
/// [`precedes_or_equals`] for the NULLS LAST inequality convention.
pub fn compare(a: Option<&Path>, b: Option<&Path>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// `a <= b` under NULLS LAST: an unset `a` never precedes anything, not even another
/// unset path, while any set path precedes an unset one.
pub fn precedes_or_equals(a: Option<&Path>, b: Option<&Path>) -> bool {
    match (a, b) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(a), Some(b)) => a <= b,
    }
}
