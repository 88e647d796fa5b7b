//! Locations and path strings

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a location became current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NavigationType {
    /// Moving through existing history entries (back/forward, initial load)
    #[default]
    Pop,
    /// A new entry pushed onto the stack
    Push,
    /// The current entry replaced
    Replace,
}

/// The parts of a URL path: pathname, search and hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Path {
    pub pathname: String,
    /// Either empty or starting with `?`
    pub search: String,
    /// Either empty or starting with `#`
    pub hash: String,
}

impl Path {
    /// Build from a pathname alone.
    pub fn from_pathname(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&create_path(self))
    }
}

/// Split a path string into pathname, search and hash.
///
/// ```
/// use datarouter::parse_path;
///
/// let path = parse_path("/users/1?tab=posts#top");
/// assert_eq!(path.pathname, "/users/1");
/// assert_eq!(path.search, "?tab=posts");
/// assert_eq!(path.hash, "#top");
/// ```
pub fn parse_path(path: &str) -> Path {
    let mut rest = path;
    let mut parsed = Path::default();

    if let Some(index) = rest.find('#') {
        parsed.hash = rest[index..].to_string();
        rest = &rest[..index];
    }
    if let Some(index) = rest.find('?') {
        parsed.search = rest[index..].to_string();
        rest = &rest[..index];
    }
    parsed.pathname = rest.to_string();
    parsed
}

/// Join pathname, search and hash back into a string.
pub fn create_path(path: &Path) -> String {
    let mut out = if path.pathname.is_empty() {
        "/".to_string()
    } else {
        path.pathname.clone()
    };
    if !path.search.is_empty() && path.search != "?" {
        if !path.search.starts_with('?') {
            out.push('?');
        }
        out.push_str(&path.search);
    }
    if !path.hash.is_empty() && path.hash != "#" {
        if !path.hash.starts_with('#') {
            out.push('#');
        }
        out.push_str(&path.hash);
    }
    out
}

/// A history entry: a path plus user state and a unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub pathname: String,
    pub search: String,
    pub hash: String,
    #[serde(default)]
    pub state: Option<Value>,
    pub key: String,
}

impl Location {
    /// Key of the initial location.
    pub const DEFAULT_KEY: &'static str = "default";

    /// Create a location with a fresh random key.
    pub fn new(path: &str) -> Self {
        Self::from_path(parse_path(path), None, create_key())
    }

    /// Create a location from parsed parts.
    pub fn from_path(path: Path, state: Option<Value>, key: String) -> Self {
        Self {
            pathname: if path.pathname.is_empty() {
                "/".to_string()
            } else {
                path.pathname
            },
            search: path.search,
            hash: path.hash,
            state,
            key,
        }
    }

    /// The initial location, keyed `default`.
    pub fn initial(path: &str) -> Self {
        Self::from_path(parse_path(path), None, Self::DEFAULT_KEY.to_string())
    }

    /// The path portion of this location.
    pub fn path(&self) -> Path {
        Path {
            pathname: self.pathname.clone(),
            search: self.search.clone(),
            hash: self.hash.clone(),
        }
    }

    /// `pathname + search + hash`
    pub fn href(&self) -> String {
        create_path(&self.path())
    }

    /// Same pathname and search, and `next` keeps or sets a hash.
    ///
    /// Removing the hash is a real navigation; staying on the same hash is not.
    pub fn is_hash_change_only(&self, next: &Self) -> bool {
        if self.pathname != next.pathname || self.search != next.search {
            return false;
        }
        if self.hash.is_empty() || self.hash != next.hash {
            return !next.hash.is_empty();
        }
        true
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::initial("/")
    }
}

/// Random 8-character location key.
pub fn create_key() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(8)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_parts() {
        let path = parse_path("/a/b?x=1#frag");
        assert_eq!(path.pathname, "/a/b");
        assert_eq!(path.search, "?x=1");
        assert_eq!(path.hash, "#frag");

        let path = parse_path("?only=search");
        assert_eq!(path.pathname, "");
        assert_eq!(path.search, "?only=search");
    }

    #[test]
    fn test_hash_before_question_mark() {
        let path = parse_path("/a#frag?not-search");
        assert_eq!(path.pathname, "/a");
        assert_eq!(path.search, "");
        assert_eq!(path.hash, "#frag?not-search");
    }

    #[test]
    fn test_create_path_roundtrip() {
        let raw = "/users/1?tab=posts#top";
        assert_eq!(create_path(&parse_path(raw)), raw);
        assert_eq!(create_path(&Path::default()), "/");
    }

    #[test]
    fn test_location_keys() {
        let initial = Location::initial("/");
        assert_eq!(initial.key, "default");

        let a = Location::new("/a");
        let b = Location::new("/a");
        assert_eq!(a.key.len(), 8);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_hash_change_only() {
        let a = Location::new("/page?x=1");
        let b = Location::new("/page?x=1#section");
        let c = Location::new("/page?x=2#section");
        assert!(a.is_hash_change_only(&b));
        assert!(!a.is_hash_change_only(&c));
        assert!(b.is_hash_change_only(&b.clone()));
        assert!(!b.is_hash_change_only(&a));
        assert!(!a.is_hash_change_only(&a.clone()));
    }
}
