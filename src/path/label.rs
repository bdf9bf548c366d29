//! Fixed-width alphanumeric labels for the dense encoding.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};

/// Default label alphabet, in ascending byte order.
pub const ALPHANUM: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Default capacity of one sibling group: four base-36 characters.
pub const DEFAULT_MAX_SIBLINGS: u64 = 36 * 36 * 36 * 36;

const MAX_WIDTH: usize = 12;

/// Renders `rank` in base 36 with [`ALPHANUM`], left-padded with `0` to `width`.
pub fn to_alphanum(rank: u64, width: usize) -> Result<String> {
    LabelFormat::new(width)?.encode(rank)
}

/// Parses a label written with [`ALPHANUM`].
pub fn from_alphanum(label: &str) -> Result<u64> {
    let width = label.len().clamp(1, MAX_WIDTH);
    LabelFormat::new(width)?.decode(label)
}

/// Alphabet and width of label components.
///
/// The alphabet must be strictly ascending so that comparing labels as text gives the
/// same order as comparing their ranks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LabelSpec", into = "LabelSpec")]
pub struct LabelFormat {
    alphabet: String,
    width: usize,
}

impl LabelFormat {
    /// Labels of `width` characters over [`ALPHANUM`].
    pub fn new(width: usize) -> Result<Self> {
        Self::with_alphabet(ALPHANUM, width)
    }

    /// Labels of `width` characters over a custom alphabet.
    pub fn with_alphabet(alphabet: impl Into<String>, width: usize) -> Result<Self> {
        let alphabet = alphabet.into();
        if alphabet.len() < 2 {
            return Err(TreeError::InvalidConfig(
                "label alphabet needs at least two characters".into(),
            ));
        }
        if !alphabet.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(TreeError::InvalidConfig(format!(
                "label alphabet {alphabet:?} must be ASCII alphanumeric"
            )));
        }
        if !alphabet.as_bytes().windows(2).all(|w| w[0] < w[1]) {
            return Err(TreeError::InvalidConfig(format!(
                "label alphabet {alphabet:?} must be strictly ascending"
            )));
        }
        let format = Self { alphabet, width };
        if width == 0 || width > MAX_WIDTH || format.checked_capacity().is_none() {
            return Err(TreeError::InvalidConfig(format!(
                "label width must be between 1 and the largest width whose capacity fits in 64 bits, got {width}"
            )));
        }
        Ok(format)
    }

    /// Smallest width over [`ALPHANUM`] holding `max_siblings` siblings.
    pub fn for_max_siblings(max_siblings: u64) -> Result<Self> {
        if max_siblings == 0 {
            return Err(TreeError::InvalidConfig(
                "max_siblings must be a positive integer".into(),
            ));
        }
        let radix = ALPHANUM.len() as u64;
        let mut width = 1;
        let mut capacity = radix;
        while capacity < max_siblings {
            width += 1;
            capacity = capacity.saturating_mul(radix);
        }
        Self::new(width)
    }

    /// Characters per label.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Alphabet size.
    pub fn radix(&self) -> u64 {
        self.alphabet.len() as u64
    }

    /// The alphabet.
    pub fn alphabet(&self) -> &str {
        &self.alphabet
    }

    /// Maximum siblings per parent, `radix ^ width`.
    pub fn capacity(&self) -> u64 {
        self.checked_capacity().unwrap_or(u64::MAX)
    }

    fn checked_capacity(&self) -> Option<u64> {
        u32::try_from(self.width)
            .ok()
            .and_then(|w| self.radix().checked_pow(w))
    }

    /// Renders a rank.
    pub fn encode(&self, rank: u64) -> Result<String> {
        if rank >= self.capacity() {
            return Err(TreeError::invalid_path(
                rank.to_string(),
                format!("rank does not fit in {} label characters", self.width),
            ));
        }
        let digits = self.alphabet.as_bytes();
        let radix = self.radix();
        let mut out = vec![digits[0]; self.width];
        let mut rest = rank;
        for slot in out.iter_mut().rev() {
            *slot = digits[(rest % radix) as usize];
            rest /= radix;
            if rest == 0 {
                break;
            }
        }
        Ok(String::from_utf8(out).unwrap_or_default())
    }

    /// Parses a label of exactly `width` characters.
    pub fn decode(&self, label: &str) -> Result<u64> {
        if label.len() != self.width {
            return Err(TreeError::invalid_path(
                label,
                format!("labels are {} characters wide", self.width),
            ));
        }
        let radix = self.radix();
        let mut rank: u64 = 0;
        for byte in label.bytes() {
            let digit = self
                .alphabet
                .bytes()
                .position(|d| d == byte)
                .ok_or_else(|| TreeError::invalid_path(label, "character outside the label alphabet"))?;
            rank = rank * radix + digit as u64;
        }
        Ok(rank)
    }
}

impl Default for LabelFormat {
    fn default() -> Self {
        Self {
            alphabet: ALPHANUM.to_string(),
            width: 4,
        }
    }
}

/// Serialized form: either `width` or `max_siblings`, plus an optional alphabet.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_siblings: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alphabet: Option<String>,
}

impl TryFrom<LabelSpec> for LabelFormat {
    type Error = TreeError;

    fn try_from(spec: LabelSpec) -> Result<Self> {
        match (spec.width, spec.max_siblings, spec.alphabet) {
            (Some(_), Some(_), _) => Err(TreeError::InvalidConfig(
                "set either `width` or `max_siblings`, not both".into(),
            )),
            (None, Some(max), None) => Self::for_max_siblings(max),
            (None, Some(_), Some(_)) => Err(TreeError::InvalidConfig(
                "`max_siblings` only applies to the default alphabet; set `width`".into(),
            )),
            (width, None, alphabet) => Self::with_alphabet(
                alphabet.unwrap_or_else(|| ALPHANUM.to_string()),
                width.unwrap_or(LabelFormat::default().width),
            ),
        }
    }
}

impl From<LabelFormat> for LabelSpec {
    fn from(format: LabelFormat) -> Self {
        let alphabet = (format.alphabet != ALPHANUM).then_some(format.alphabet);
        LabelSpec {
            width: Some(format.width),
            max_siblings: None,
            alphabet,
        }
    }
}
