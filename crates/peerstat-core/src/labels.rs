//! Label sets: the identity of one series within a metric.
//!
//! Pairs are kept sorted by key so that two sets built in a different
//! enumeration order compare, hash and render identically.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sorted association list of label key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    /// The empty label set (a metric's single unlabelled series).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build from arbitrary pairs. Duplicate keys keep the last value.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut out: Vec<(String, String)> = Vec::new();
        for (k, v) in pairs {
            let (k, v) = (k.into(), v.into());
            match out.iter_mut().find(|(ek, _)| *ek == k) {
                Some(existing) => existing.1 = v,
                None => out.push((k, v)),
            }
        }
        out.sort();
        Self(out)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when this set uses exactly the given (sorted) keys.
    pub(crate) fn has_keys(&self, declared: &[String]) -> bool {
        self.0.len() == declared.len() && self.keys().zip(declared).all(|(a, b)| a == b)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl From<Vec<(String, String)>> for LabelSet {
    /// Re-sorts, so sets decoded off the wire keep the canonical identity.
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::new(pairs)
    }
}

impl From<LabelSet> for Vec<(String, String)> {
    fn from(labels: LabelSet) -> Self {
        labels.0
    }
}

impl From<&[(&str, &str)]> for LabelSet {
    fn from(pairs: &[(&str, &str)]) -> Self {
        Self::new(pairs.iter().copied())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for LabelSet {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self::new(pairs)
    }
}

/// Escape a label value for the text exposition.
pub(crate) fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

impl fmt::Display for LabelSet {
    /// Renders `{k="v",...}`, or nothing for the empty set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=\"{}\"", k, escape_label(v))?;
        }
        f.write_str("}")
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_valid_label_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
