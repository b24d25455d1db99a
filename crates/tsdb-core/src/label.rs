//! Labels and label sets (spec §3).

use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const METRIC_NAME_LABEL: &str = "__name__";

/// An ordered (name, value) pair. Both sides must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || value.is_empty() {
            return Err(Error::InvalidArgument(
                "label name and value must be non-empty".to_string(),
            ));
        }
        Ok(Self { name, value })
    }
}

/// A set of labels with unique names, canonically ordered by name.
///
/// Backed by a `BTreeMap` so canonical (sorted-by-name) iteration is free
/// and duplicate names are a structural impossibility rather than a
/// validated invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (k, v) in pairs {
            set.insert(k, v)?;
        }
        if set.labels.is_empty() {
            return Err(Error::InvalidArgument("label set must not be empty".into()));
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let label = Label::new(name, value)?;
        self.labels.insert(label.name, label.value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Canonical byte encoding used for hashing and on-disk dictionaries:
    /// names are already sorted by construction, so this is a direct
    /// length-prefixed concatenation.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.labels.len() * 16);
        for (name, value) in &self.labels {
            buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value.as_bytes());
        }
        buf
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            labels: BTreeMap::from_iter(iter),
        }
    }
}
