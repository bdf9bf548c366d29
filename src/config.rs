//! Path field configuration.
//!
//! A [`PathConfig`] names the fields involved in path maintenance, the sibling order and
//! the path encoding. It can be built in code or loaded from TOML:
//!
//! ```toml
//! path_field = "path"
//! parent_field = "parent_id"
//! order_by = ["name", "-population"]
//! orphans = "strict"
//! gaps = "leave"
//!
//! [encoding]
//! kind = "label"
//! width = 2
//! ```

use std::fmt;
use std::fs;
use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::path::{Encoding, KeyFormat, LabelFormat};

/// Sort direction of one rank field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest value first.
    #[default]
    Ascending,
    /// Largest value first.
    Descending,
}

/// One entry of `order_by`, written `"field"` or `"-field"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RankKey {
    /// Attribute name; `id` and `pk` rank on the node id.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

impl RankKey {
    /// Ascending key on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    /// Descending key on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    /// Parses `"field"` or `"-field"`.
    pub fn parse(text: &str) -> Result<Self> {
        let key = match text.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(text),
        };
        validate_identifier("order_by", &key.field)?;
        Ok(key)
    }
}

impl fmt::Display for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.direction == Direction::Descending {
            f.write_str("-")?;
        }
        f.write_str(&self.field)
    }
}

impl TryFrom<String> for RankKey {
    type Error = TreeError;

    fn try_from(text: String) -> Result<Self> {
        Self::parse(&text)
    }
}

impl From<RankKey> for String {
    fn from(key: RankKey) -> Self {
        key.to_string()
    }
}

/// What a rebuild does with nodes whose parent no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Fail with an integrity error.
    #[default]
    Strict,
    /// Place orphans among the roots.
    AsRoot,
}

/// What happens to a label group after one of its members leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Keep the remaining labels; the next insert or rebuild closes the gap.
    #[default]
    Leave,
    /// Renumber the group in the same transaction.
    Compact,
}

/// Configuration of one maintained path field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    /// Name of the derived path attribute.
    pub path_field: String,
    /// Name of the parent reference attribute.
    pub parent_field: String,
    /// Sibling order; the node id is appended as final tie-break.
    pub order_by: Vec<RankKey>,
    /// Handling of dangling parent references during rebuilds.
    pub orphans: OrphanPolicy,
    /// Handling of label gaps left by moves and deletes.
    pub gaps: GapPolicy,
    /// Component representation.
    pub encoding: Encoding,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            path_field: "path".to_string(),
            parent_field: "parent_id".to_string(),
            order_by: Vec::new(),
            orphans: OrphanPolicy::default(),
            gaps: GapPolicy::default(),
            encoding: Encoding::default(),
        }
    }
}

impl PathConfig {
    /// Label encoding of `width` characters, ordered by `order_by`.
    pub fn labels<I, S>(width: usize, order_by: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default()
            .with_encoding(Encoding::Label(LabelFormat::new(width)?))
            .with_order_by(order_by)
    }

    /// Sparse key encoding with the default step, ordered by `order_by`.
    pub fn sparse<I, S>(order_by: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default()
            .with_encoding(Encoding::Key(KeyFormat::default()))
            .with_order_by(order_by)
    }

    /// Replaces the sibling order, parsing `"field"` / `"-field"` entries.
    pub fn with_order_by<I, S>(mut self, order_by: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.order_by = order_by
            .into_iter()
            .map(|key| RankKey::parse(key.as_ref()))
            .collect::<Result<_>>()?;
        self.validate()?;
        Ok(self)
    }

    /// Replaces the encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the orphan policy.
    pub fn with_orphans(mut self, orphans: OrphanPolicy) -> Self {
        self.orphans = orphans;
        self
    }

    /// Sets the gap policy.
    pub fn with_gaps(mut self, gaps: GapPolicy) -> Self {
        self.gaps = gaps;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PathConfig =
            toml::from_str(text).map_err(|err| TreeError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| TreeError::InvalidConfig(err.to_string()))
    }

    /// Checks field names and policy combinations.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("path_field", &self.path_field)?;
        validate_identifier("parent_field", &self.parent_field)?;
        if self.path_field == self.parent_field {
            return Err(TreeError::InvalidConfig(
                "path_field and parent_field must differ".into(),
            ));
        }
        for key in &self.order_by {
            validate_identifier("order_by", &key.field)?;
            if key.field == self.path_field {
                return Err(TreeError::InvalidConfig(format!(
                    "cannot use `{}` in order_by since it is the path field",
                    self.path_field
                )));
            }
        }
        if let Encoding::Key(format) = &self.encoding {
            if format.step <= 0 {
                return Err(TreeError::InvalidConfig(format!(
                    "key step must be positive, got {}",
                    format.step
                )));
            }
            if self.gaps == GapPolicy::Compact {
                return Err(TreeError::InvalidConfig(
                    "gap compaction requires the label encoding".into(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_identifier(what: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TreeError::InvalidConfig(format!(
            "{what} entry {name:?} is not a valid field name"
        )))
    }
}
