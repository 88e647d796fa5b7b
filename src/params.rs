//! Route parameter extraction and search string parsing
//!
//! [`RouteParams`] holds values captured from route patterns (`:id`, `:lang?`,
//! and the splat `*`). [`SearchParams`] parses the query string of a location.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Key under which a trailing `*` stores its capture.
pub const SPLAT: &str = "*";

/// Values captured by a match chain.
///
/// Parameters keep the order in which they were captured, root to leaf. An
/// optional segment that did not match is present with an undefined value.
///
/// ```
/// use datarouter::{match_path, PathPattern};
///
/// let m = match_path(&PathPattern::new("/:org/issues/:number/:tab?"), "/acme/issues/42").unwrap();
/// assert_eq!(m.params.get_as::<u32>("number"), Some(42));
/// assert!(m.params.contains("tab"));
/// assert_eq!(m.params.get("tab"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    params: Vec<(String, Option<String>)>,
}

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Params with every value defined, ordered by key.
    pub fn from_map(params: HashMap<String, String>) -> Self {
        let mut pairs: Vec<_> = params.into_iter().map(|(k, v)| (k, Some(v))).collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self { params: pairs }
    }

    /// Get a parameter value; `None` if absent or undefined.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Parse a defined parameter; `None` when absent, undefined or unparsable.
    pub fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: std::str::FromStr,
    {
        self.get(key)?.parse().ok()
    }

    /// The splat capture, if any.
    pub fn splat(&self) -> Option<&str> {
        self.get(SPLAT)
    }

    /// Insert or overwrite a defined parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set_optional(key.into(), Some(value.into()));
    }

    /// Insert or overwrite a parameter that may be undefined.
    pub fn set_optional(&mut self, key: String, value: Option<String>) {
        if let Some(slot) = self.params.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.params.push((key, value));
        }
    }

    /// Merge deeper params in: keys are added or overwritten, never removed.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.params {
            self.set_optional(key.clone(), value.clone());
        }
    }

    /// Whether `key` was captured, defined or not.
    pub fn contains(&self, key: &str) -> bool {
        self.params.iter().any(|(k, _)| k == key)
    }

    /// Iterate over defined parameters
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    /// Iterate over all parameters, including undefined ones
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of captured keys, undefined ones included.
    pub fn len(&self) -> usize {
        self.params.len()
    }
}

impl Serialize for RouteParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (key, value) in &self.params {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RouteParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

// ============================================================================
// Search Parameters
// ============================================================================

/// Query parameters parsed from a location's search string
///
/// Supports multiple values for the same key and keeps the original order.
///
/// # Example
///
/// ```
/// use datarouter::SearchParams;
///
/// let search = SearchParams::parse("?page=1&tag=rust&tag=router&index");
///
/// assert_eq!(search.get("page"), Some("1"));
/// assert_eq!(search.get_all("tag"), vec!["rust", "router"]);
/// assert!(search.has_naked("index"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pairs: Vec<(String, String)>,
}

impl SearchParams {
    /// Create new empty search params
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a search string, with or without the leading `?`
    pub fn parse(search: &str) -> Self {
        let query = search.strip_prefix('?').unwrap_or(search);
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// First value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a key
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a key is present
    pub fn has(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Check for a value-less occurrence of `key` (`?index` or `?index=`).
    pub fn has_naked(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, v)| k == key && v.is_empty())
    }

    /// Append a pair
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Remove every pair for `key`
    pub fn delete(&mut self, key: &str) {
        self.pairs.retain(|(k, _)| k != key);
    }

    /// Iterate over pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Serialize back to a search string: `""` when empty, otherwise `?a=b`.
    ///
    /// Value-less keys are written without `=` so `?index` survives a round trip.
    pub fn to_search_string(&self) -> String {
        if self.pairs.is_empty() {
            return String::new();
        }
        let encoded: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| {
                let key: String = url::form_urlencoded::byte_serialize(k.as_bytes()).collect();
                if v.is_empty() {
                    key
                } else {
                    let value: String =
                        url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
                    format!("{}={}", key, value)
                }
            })
            .collect();
        format!("?{}", encoded.join("&"))
    }
}

// ============================================================================
// Tests
// ============================================================================
