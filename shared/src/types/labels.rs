//! Canonical label sets
//!
//! A `LabelSet` is always sorted ascending by name with unique names, so its
//! hash and rendering are stable. Labels whose name starts with `__` are
//! private: they route queries internally and are hidden from user views.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

use crate::error::ModelError;

/// Prefix marking a label as private (routing-only).
pub const RESERVED_LABEL_PREFIX: &str = "__";

/// The label carrying the profile-type selection in a query selector.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single `(name, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether this label is hidden from user-facing views.
    pub fn is_private(&self) -> bool {
        self.name.starts_with(RESERVED_LABEL_PREFIX)
    }
}

/// An ordered label set: sorted ascending by name, each name unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Stable 64-bit hash over the canonical byte form `name\0value\0...`.
    ///
    /// Equal label sets hash equal; the sort order makes the byte form
    /// canonical.
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for label in &self.0 {
            hasher.update(label.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(label.value.as_bytes());
            hasher.update(&[0]);
        }
        hasher.digest()
    }

    /// The user-visible view: every `__`-prefixed label dropped.
    pub fn without_private_labels(&self) -> LabelSet {
        LabelSet(self.0.iter().filter(|l| !l.is_private()).cloned().collect())
    }

    /// Value of the label with the given name, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Accumulates `(name, value)` pairs into a canonical `LabelSet`.
///
/// Setting the same name twice keeps the later value.
#[derive(Debug, Default)]
pub struct LabelSetBuilder {
    pairs: HashMap<String, String>,
}

impl LabelSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.insert(name.into(), value.into());
        self
    }

    pub fn build(&self) -> LabelSet {
        let mut labels: Vec<Label> = self
            .pairs
            .iter()
            .map(|(name, value)| Label::new(name.clone(), value.clone()))
            .collect();
        labels.sort();
        LabelSet(labels)
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut builder = LabelSetBuilder::new();
        for (name, value) in iter {
            builder.set(name, value);
        }
        builder.build()
    }
}

/// Validates a label name against `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates a label name, reporting failures as a model error.
pub fn validate_label_name(name: &str) -> Result<(), ModelError> {
    if valid_label_name(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidLabelName(name.to_string()))
    }
}
