//! # Case-Insensitive Header Multimap
//!
//! HTTP header fields are case-insensitive by name and may legally repeat
//! (`Set-Cookie` being the canonical offender). [`Headers`] therefore stores
//! entries as an ordered list of `(name, value)` pairs: lookups compare
//! names ASCII-case-insensitively, duplicates are preserved, and insertion
//! order is kept so a response can be reproduced faithfully.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use serde::{Deserialize, Serialize};

/// Ordered, case-insensitive multimap of header name/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header entry. Existing entries with the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Returns the first value stored under `name`, comparing names
    /// case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value stored under `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Returns true if at least one entry is stored under `name`.
    pub fn contains_key(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Iterates over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of stored entries, duplicates included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses one raw header line (`Name: value`) and appends it.
    ///
    /// The line is split at the first `:`; leading whitespace and trailing
    /// CR/LF are trimmed from the value. Lines without a `:` (status lines,
    /// blank separators) are ignored and reported as `false`.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let Some(colon) = line.find(':') else {
            return false;
        };
        let name = line[..colon].trim_end();
        if name.is_empty() {
            return false;
        }
        let value = line[colon + 1..]
            .trim_start()
            .trim_end_matches(['\r', '\n']);
        self.insert(name, value);
        true
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}
