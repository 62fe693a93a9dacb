//! Breakpoints
//!
//! Maps the viewport width onto the size key of the image variant to fetch.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Width range of a breakpoint, in CSS pixels (inclusive on both ends).
///
/// A missing bound leaves that side of the range open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
}

impl BreakpointRange {
    /// Range with both bounds
    pub const fn between(min_width: u32, max_width: u32) -> Self {
        Self { min_width: Some(min_width), max_width: Some(max_width) }
    }

    /// Range open at the top
    pub const fn at_least(min_width: u32) -> Self {
        Self { min_width: Some(min_width), max_width: None }
    }

    /// Range open at the bottom
    pub const fn at_most(max_width: u32) -> Self {
        Self { min_width: None, max_width: Some(max_width) }
    }

    /// Check whether `width` falls inside the range
    #[inline]
    pub fn contains(&self, width: u32) -> bool {
        self.min_width.is_none_or(|min| width >= min)
            && self.max_width.is_none_or(|max| width <= max)
    }
}

/// Ordered table of size keys and their width ranges.
///
/// Declaration order is significant: ranges may overlap and the last
/// matching entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointTable {
    entries: IndexMap<String, BreakpointRange>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, builder style. Re-inserting a key keeps its
    /// original position.
    pub fn with(mut self, key: impl Into<String>, range: BreakpointRange) -> Self {
        self.insert(key, range);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, range: BreakpointRange) {
        self.entries.insert(key.into(), range);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&BreakpointRange> {
        self.entries.get(key)
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BreakpointRange)> {
        self.entries.iter().map(|(key, range)| (key.as_str(), range))
    }

    /// Resolve the size key for `width`. See [`resolve`].
    pub fn resolve(&self, width: u32) -> &str {
        resolve(self, width)
    }
}

impl<K: Into<String>> FromIterator<(K, BreakpointRange)> for BreakpointTable {
    fn from_iter<T: IntoIterator<Item = (K, BreakpointRange)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(key, range)| (key.into(), range)).collect(),
        }
    }
}

/// Select the size key for a viewport width.
///
/// Every entry is visited; a later match overrides an earlier one, so the
/// result is the last matching key in declaration order. Returns an empty
/// string when nothing matches.
pub fn resolve(table: &BreakpointTable, width: u32) -> &str {
    let mut selected = "";

    for (key, range) in table.iter() {
        if range.contains(width) {
            selected = key;
        }
    }

    selected
}
