//! Text form of paths.

use serde::{Deserialize, Serialize};

use super::{Component, LabelFormat, Path, SparseKey};
use crate::error::{Result, TreeError};

/// Separator between label components.
pub const LABEL_SEPARATOR: char = '.';
/// Separator between sparse key components.
pub const KEY_SEPARATOR: char = '/';

/// Step between consecutive keys when spacing a group from scratch.
pub const DEFAULT_KEY_STEP: i64 = 2;

/// Parameters of the sparse key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFormat {
    /// Distance between a new first or last key and its neighbour.
    pub step: i64,
}

impl Default for KeyFormat {
    fn default() -> Self {
        Self {
            step: DEFAULT_KEY_STEP,
        }
    }
}

/// How path components are represented and written as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Fixed-width labels joined with `.`, relabelling siblings on insert.
    Label(LabelFormat),
    /// Exact sparse keys joined with `/`, never relabelling siblings.
    Key(KeyFormat),
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Label(LabelFormat::default())
    }
}

impl Encoding {
    /// Separator written between components.
    pub fn separator(&self) -> char {
        match self {
            Encoding::Label(_) => LABEL_SEPARATOR,
            Encoding::Key(_) => KEY_SEPARATOR,
        }
    }

    /// Maximum siblings per parent, `None` when unbounded.
    pub fn capacity(&self) -> Option<u64> {
        match self {
            Encoding::Label(format) => Some(format.capacity()),
            Encoding::Key(_) => None,
        }
    }

    /// Component given to the sibling at `rank` when a group is numbered from scratch.
    pub fn component_for_rank(&self, rank: u64) -> Result<Component> {
        match self {
            Encoding::Label(format) => {
                if rank >= format.capacity() {
                    return Err(TreeError::invalid_path(
                        rank.to_string(),
                        format!("rank does not fit in {} label characters", format.width()),
                    ));
                }
                Ok(Component::Label(rank))
            }
            Encoding::Key(format) => {
                let rank = i64::try_from(rank)
                    .ok()
                    .and_then(|r| r.checked_mul(format.step))
                    .ok_or_else(|| {
                        TreeError::invalid_path(rank.to_string(), "sparse key out of range")
                    })?;
                Ok(Component::Key(SparseKey::from_int(rank)?))
            }
        }
    }

    /// Text of the component at `rank`, as written by set-based rebuilds.
    pub fn render_rank(&self, rank: u64) -> Result<String> {
        let component = self.component_for_rank(rank)?;
        self.format_component(&component)
    }

    /// Writes a path as text.
    pub fn format(&self, path: &Path) -> Result<String> {
        let mut out = String::new();
        for (idx, component) in path.components().iter().enumerate() {
            if idx > 0 {
                out.push(self.separator());
            }
            out.push_str(&self.format_component(component)?);
        }
        Ok(out)
    }

    /// Parses the text form of a path. The empty string is not a valid stored path.
    pub fn parse(&self, text: &str) -> Result<Path> {
        if text.is_empty() {
            return Err(TreeError::invalid_path(text, "empty path"));
        }
        let components = text
            .split(self.separator())
            .map(|part| self.parse_component(part))
            .collect::<Result<Vec<_>>>()?;
        Ok(Path::from_components(components))
    }

    fn format_component(&self, component: &Component) -> Result<String> {
        match (self, component) {
            (Encoding::Label(format), Component::Label(rank)) => format.encode(*rank),
            (Encoding::Key(_), Component::Key(key)) => Ok(key.to_string()),
            (Encoding::Label(_), Component::Key(key)) => Err(TreeError::invalid_path(
                key.to_string(),
                "sparse key in a label-encoded path",
            )),
            (Encoding::Key(_), Component::Label(rank)) => Err(TreeError::invalid_path(
                rank.to_string(),
                "label in a key-encoded path",
            )),
        }
    }

    fn parse_component(&self, text: &str) -> Result<Component> {
        match self {
            Encoding::Label(format) => format.decode(text).map(Component::Label),
            Encoding::Key(_) => text.parse::<SparseKey>().map(Component::Key),
        }
    }
}
