//! Path pattern compilation and matching
//!
//! A pattern is a `/`-separated template. Each segment is one of:
//!
//! - static text: `users`
//! - a required parameter: `:id`
//! - an optional parameter: `:lang?`
//! - a trailing splat: `*`
//!
//! [`compile_path`] turns a pattern into a regex plus an ordered list of
//! parameter descriptors; [`match_path`] runs it against a pathname.

use crate::error::RouterError;
use crate::location::{parse_path, Path};
use crate::params::{RouteParams, SPLAT};
use crate::{trace_log, warn_log};
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::borrow::Cow;

/// A pattern together with its matching flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    pub path: String,
    pub case_sensitive: bool,
    /// Whether the match must consume the whole pathname
    pub end: bool,
}

impl PathPattern {
    /// Case-insensitive, end-anchored pattern.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            case_sensitive: false,
            end: true,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn end(mut self, end: bool) -> Self {
        self.end = end;
        self
    }
}

/// One parameter captured by a compiled pattern, in capture-group order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPathParam {
    pub param_name: String,
    pub is_optional: bool,
}

/// A compiled pattern: the regex and its parameter descriptors.
#[derive(Debug, Clone)]
pub struct CompiledPath {
    matcher: Regex,
    params: Vec<CompiledPathParam>,
    /// Non-`end` patterns capture the `/`-or-end assertion as a last group,
    /// which is not part of the matched pathname.
    has_tail_group: bool,
}

/// Result of matching a pattern against a pathname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub params: RouteParams,
    /// The portion of the pathname that was matched
    pub pathname: String,
    /// The matched portion before any splat, without trailing slashes
    pub pathname_base: String,
    pub pattern: PathPattern,
}

/// Rewrite `/files*` as `/files/*`; only bare `*` and `/*` keep their form.
fn normalize_splat(path: &str) -> Cow<'_, str> {
    if path != "*" && path.ends_with('*') && !path.ends_with("/*") {
        warn_log!(
            "Route path \"{}\" will be treated as if it were \"{}/*\" because the `*` character must always follow a `/` in the pattern",
            path,
            &path[..path.len() - 1]
        );
        Cow::Owned(format!("{}/*", &path[..path.len() - 1]))
    } else {
        Cow::Borrowed(path)
    }
}

fn is_param_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Compile a pattern into a matcher.
///
/// Compiling the same `(path, case_sensitive, end)` always yields an
/// equivalent matcher, so results may be cached by that triple.
pub fn compile_path(
    path: &str,
    case_sensitive: bool,
    end: bool,
) -> Result<CompiledPath, RouterError> {
    let path = normalize_splat(path);
    let is_splat = path.ends_with('*');

    // Drop a trailing `*` and the slashes before it; the splat is appended below.
    let mut trimmed: &str = &path;
    if let Some(stripped) = trimmed.strip_suffix('*') {
        trimmed = stripped;
    }
    let trimmed = trimmed.trim_end_matches('/');
    let body = trimmed.trim_start_matches('/');

    let mut source = String::from(if case_sensitive { "^" } else { "(?i)^" });
    let mut params = Vec::new();

    for segment in body.split('/') {
        match segment.strip_prefix(':') {
            Some(rest) if rest.starts_with(is_param_char) => {
                let name_len = rest.find(|c| !is_param_char(c)).unwrap_or(rest.len());
                let (name, mut tail) = rest.split_at(name_len);
                let is_optional = tail.starts_with('?');
                if is_optional {
                    tail = &tail[1..];
                    source.push_str("/?([^/]+)?");
                } else {
                    source.push_str("/([^/]+)");
                }
                source.push_str(&regex::escape(tail));
                params.push(CompiledPathParam {
                    param_name: name.to_string(),
                    is_optional,
                });
            }
            _ => {
                source.push('/');
                source.push_str(&regex::escape(segment));
            }
        }
    }

    let mut has_tail_group = false;
    if is_splat {
        params.push(CompiledPathParam {
            param_name: SPLAT.to_string(),
            is_optional: false,
        });
        if path == "*" || path == "/*" {
            source.push_str("(.*)$");
        } else {
            source.push_str("(?:/(.+)|/*)$");
        }
    } else if end {
        source.push_str("/*$");
    } else if !path.is_empty() && path != "/" {
        // A following `/` or the end of the string; never a word boundary,
        // since `-` is a valid segment character.
        source.push_str("(/|$)");
        has_tail_group = true;
    }

    // An empty body means the pattern was `""`, `/`, `*` or `/*`: the loop
    // above emitted a single `/`, which is exactly the root.
    trace_log!("compiled '{}' (end={}) to {}", path, end, source);

    let matcher = Regex::new(&source).map_err(|source| RouterError::Pattern {
        pattern: path.to_string(),
        source,
    })?;

    Ok(CompiledPath {
        matcher,
        params,
        has_tail_group,
    })
}

impl CompiledPath {
    /// Parameter descriptors in capture order.
    pub fn params(&self) -> &[CompiledPathParam] {
        &self.params
    }

    /// The underlying regex source.
    pub fn as_str(&self) -> &str {
        self.matcher.as_str()
    }

    /// Match a (decoded) pathname against this compiled pattern.
    pub fn match_pathname(&self, pattern: &PathPattern, pathname: &str) -> Option<PathMatch> {
        let captures = self.matcher.captures(pathname)?;
        let whole = captures.get(0)?;
        let matched_end = if self.has_tail_group {
            captures
                .get(self.params.len() + 1)
                .map_or(whole.end(), |tail| tail.start())
        } else {
            whole.end()
        };
        let matched_pathname = &pathname[whole.start()..matched_end];
        let mut pathname_base = trim_trailing_slashes(matched_pathname).to_string();

        let mut params = RouteParams::new();
        for (index, param) in self.params.iter().enumerate() {
            let value = captures.get(index + 1).map(|m| m.as_str());
            if param.param_name == SPLAT {
                let splat_value = value.unwrap_or("");
                let base = &matched_pathname[..matched_pathname.len() - splat_value.len()];
                pathname_base = trim_trailing_slashes(base).to_string();
            }
            match value {
                None | Some("") if param.is_optional => {
                    params.set_optional(param.param_name.clone(), None);
                }
                _ => {
                    let value = value.unwrap_or("").replace("%2F", "/");
                    params.set_optional(param.param_name.clone(), Some(value));
                }
            }
        }

        Some(PathMatch {
            params,
            pathname: matched_pathname.to_string(),
            pathname_base,
            pattern: pattern.clone(),
        })
    }
}

/// Remove trailing slashes unless the string is only slashes (`/` stays `/`).
fn trim_trailing_slashes(value: &str) -> &str {
    let trimmed = value.trim_end_matches('/');
    if trimmed.is_empty() && !value.is_empty() {
        &value[..1]
    } else {
        trimmed
    }
}

/// Match a pattern against a pathname.
///
/// ```
/// use datarouter::{match_path, PathPattern};
///
/// let m = match_path(&PathPattern::new("/:foo/somewhere/:bar"), "/tobi/somewhere/123").unwrap();
/// assert_eq!(m.params.get("foo"), Some("tobi"));
/// assert_eq!(m.params.get("bar"), Some("123"));
/// assert_eq!(m.pathname, "/tobi/somewhere/123");
/// ```
pub fn match_path(pattern: &PathPattern, pathname: &str) -> Option<PathMatch> {
    match compile_path(&pattern.path, pattern.case_sensitive, pattern.end) {
        Ok(compiled) => compiled.match_pathname(pattern, pathname),
        Err(e) => {
            warn_log!("{}", e);
            None
        }
    }
}

/// Percent-decode each segment of a pathname, re-encoding `/` as `%2F` so a
/// decoded slash can never be mistaken for a separator.
///
/// Malformed input (a stray `%` or invalid UTF-8) is returned unchanged as a
/// whole, never partially decoded.
pub fn decode_path(value: &str) -> String {
    let mut decoded = Vec::new();
    for segment in value.split('/') {
        let text = if has_malformed_escape(segment) {
            None
        } else {
            percent_decode_str(segment).decode_utf8().ok()
        };
        match text {
            Some(text) => decoded.push(text.replace('/', "%2F")),
            None => {
                warn_log!(
                    "The URL path \"{}\" could not be decoded because it is a malformed URL segment",
                    value
                );
                return value.to_string();
            }
        }
    }
    decoded.join("/")
}

fn has_malformed_escape(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'%'
            && !(bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit))
    })
}

/// Join path pieces with `/`, collapsing repeated slashes.
pub fn join_paths<S: AsRef<str>>(paths: &[S]) -> String {
    let joined = paths
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("/");
    let mut out = String::with_capacity(joined.len());
    let mut last_was_slash = false;
    for c in joined.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

/// Strip trailing slashes and force exactly one leading slash.
pub fn normalize_pathname(pathname: &str) -> String {
    format!("/{}", pathname.trim_end_matches('/').trim_start_matches('/'))
}

/// Resolve `to` (absolute or relative, with `.` and `..`) against a pathname.
///
/// ```
/// use datarouter::resolve_path;
///
/// assert_eq!(resolve_path("../settings?tab=1", "/users/42").pathname, "/users/settings");
/// assert_eq!(resolve_path("/abs", "/users/42").pathname, "/abs");
/// ```
pub fn resolve_path(to: &str, from_pathname: &str) -> Path {
    let parsed = parse_path(to);
    let pathname = if parsed.pathname.is_empty() {
        from_pathname.to_string()
    } else if parsed.pathname.starts_with('/') {
        parsed.pathname
    } else {
        resolve_pathname(&parsed.pathname, from_pathname)
    };
    Path {
        pathname,
        search: normalize_prefixed(&parsed.search, '?'),
        hash: normalize_prefixed(&parsed.hash, '#'),
    }
}

fn resolve_pathname(relative_path: &str, from_pathname: &str) -> String {
    let mut segments: Vec<&str> = from_pathname.trim_end_matches('/').split('/').collect();
    for segment in relative_path.split('/') {
        match segment {
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            "." => {}
            other => segments.push(other),
        }
    }
    if segments.len() > 1 {
        segments.join("/")
    } else {
        "/".to_string()
    }
}

fn normalize_prefixed(value: &str, prefix: char) -> String {
    if value.is_empty() || value.len() == 1 && value.starts_with(prefix) {
        String::new()
    } else if value.starts_with(prefix) {
        value.to_string()
    } else {
        format!("{}{}", prefix, value)
    }
}

/// Interpolate params into a pattern.
///
/// ```
/// use datarouter::{generate_path, RouteParams};
///
/// let params: RouteParams = [("id", "123")].into_iter().collect();
/// assert_eq!(generate_path("/users/:id/:tab?", &params).unwrap(), "/users/123");
/// ```
pub fn generate_path(pattern: &str, params: &RouteParams) -> Result<String, RouterError> {
    let path = normalize_splat(pattern);
    let prefix = if path.starts_with('/') { "/" } else { "" };
    let raw_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = raw_segments.len().saturating_sub(1);

    let mut segments = Vec::with_capacity(raw_segments.len());
    for (index, segment) in raw_segments.iter().enumerate() {
        if index == last && *segment == SPLAT {
            segments.push(params.splat().unwrap_or("").to_string());
            continue;
        }
        match segment.strip_prefix(':') {
            Some(rest) if !rest.is_empty() => {
                let (key, optional) = match rest.strip_suffix('?') {
                    Some(key) => (key, true),
                    None => (rest, false),
                };
                match params.get(key) {
                    Some(value) => segments.push(value.to_string()),
                    None if optional => {}
                    None => {
                        return Err(RouterError::InvalidPath {
                            path: pattern.to_string(),
                            reason: format!("Missing \":{}\" param", key),
                        })
                    }
                }
            }
            _ => segments.push(segment.trim_end_matches('?').to_string()),
        }
    }
    segments.retain(|s| !s.is_empty());
    Ok(format!("{}{}", prefix, segments.join("/")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(path: &str, pathname: &str) -> Option<PathMatch> {
        match_path(&PathPattern::new(path), pathname)
    }

    #[test]
    fn test_static_route_matching() {
        assert!(matches("/users", "/users").is_some());
        assert!(matches("/users", "/users/").is_some());
        assert!(matches("/users", "/posts").is_none());
        assert!(matches("/users", "/users/123").is_none());
    }

    #[test]
    fn test_dynamic_route_matching() {
        let m = matches("/:foo/somewhere/:bar", "/tobi/somewhere/123").unwrap();
        assert_eq!(m.params.get("foo"), Some("tobi"));
        assert_eq!(m.params.get("bar"), Some("123"));
        assert_eq!(m.pathname, "/tobi/somewhere/123");
        assert_eq!(m.pathname_base, "/tobi/somewhere/123");
    }

    #[test]
    fn test_case_sensitivity() {
        assert!(matches("/Users", "/users").is_some());
        let strict = PathPattern::new("/Users").case_sensitive(true);
        assert!(match_path(&strict, "/users").is_none());
        assert!(match_path(&strict, "/Users").is_some());
    }

    #[test]
    fn test_optional_param() {
        let m = matches("/:lang?/about", "/about").unwrap();
        assert!(m.params.contains("lang"));
        assert_eq!(m.params.get("lang"), None);

        let m = matches("/:lang?/about", "/en/about").unwrap();
        assert_eq!(m.params.get("lang"), Some("en"));
    }

    #[test]
    fn test_param_with_static_suffix() {
        let m = matches("/files/:name.json", "/files/report.json").unwrap();
        assert_eq!(m.params.get("name"), Some("report"));
        assert!(matches("/files/:name.json", "/files/reportxjson").is_none());
    }

    #[test]
    fn test_wildcard_matching() {
        let m = matches("/files/*", "/files/docs/report.pdf").unwrap();
        assert_eq!(m.params.splat(), Some("docs/report.pdf"));
        assert_eq!(m.pathname_base, "/files");

        let m = matches("/files/*", "/files").unwrap();
        assert_eq!(m.params.splat(), Some(""));

        assert!(matches("/files/*", "/filesystem").is_none());
        assert!(matches("/files/*", "/other").is_none());
    }

    #[test]
    fn test_bare_splat() {
        let m = matches("*", "/anything/at/all").unwrap();
        assert_eq!(m.params.splat(), Some("anything/at/all"));
        assert_eq!(m.pathname_base, "/");
    }

    #[test]
    fn test_trailing_star_without_slash_is_normalized() {
        let m = matches("/files*", "/files/a").unwrap();
        assert_eq!(m.params.splat(), Some("a"));
    }

    #[test]
    fn test_non_end_uses_slash_or_end_not_word_boundary() {
        let pattern = PathPattern::new("/user").end(false);
        assert!(match_path(&pattern, "/user-preferences").is_none());

        let pattern = PathPattern::new("/user-preferences").end(false);
        let m = match_path(&pattern, "/user-preferences/theme").unwrap();
        assert_eq!(m.pathname, "/user-preferences");

        let pattern = PathPattern::new("/users").end(false);
        let m = match_path(&pattern, "/users/").unwrap();
        assert_eq!(m.pathname, "/users");
    }

    #[test]
    fn test_root_non_end_matches_everything() {
        let pattern = PathPattern::new("/").end(false);
        let m = match_path(&pattern, "/a/b").unwrap();
        assert_eq!(m.pathname, "/");
        assert_eq!(m.pathname_base, "/");
    }

    #[test]
    fn test_regex_metacharacters_are_escaped() {
        assert!(matches("/a.b", "/a.b").is_some());
        assert!(matches("/a.b", "/axb").is_none());
        assert!(matches("/(group)", "/(group)").is_some());
    }

    #[test]
    fn test_encoded_slash_in_param() {
        let decoded = decode_path("/files/a%2Fb/c%20d");
        assert_eq!(decoded, "/files/a%2Fb/c d");
        let m = matches("/files/:name/:other", &decoded).unwrap();
        assert_eq!(m.params.get("name"), Some("a/b"));
        assert_eq!(m.params.get("other"), Some("c d"));
    }

    #[test]
    fn test_malformed_decode_returns_input() {
        assert_eq!(decode_path("/bad/%E0%A4%A"), "/bad/%E0%A4%A");
        // One bad escape keeps the valid segments encoded too.
        assert_eq!(decode_path("/a%20b/%zz"), "/a%20b/%zz");
        assert_eq!(decode_path("/a%20b/100%"), "/a%20b/100%");
        assert_eq!(decode_path("/a%20b/%41"), "/a b/A");
    }

    #[test]
    fn test_compiled_params_order() {
        let compiled = compile_path("/:a/x/:b?/*", false, true).unwrap();
        let names: Vec<_> = compiled
            .params()
            .iter()
            .map(|p| (p.param_name.as_str(), p.is_optional))
            .collect();
        assert_eq!(names, vec![("a", false), ("b", true), ("*", false)]);
    }

    #[test]
    fn test_join_and_normalize() {
        assert_eq!(join_paths(&["/", "users", "/1"]), "/users/1");
        assert_eq!(join_paths(&["/a/", "/b/"]), "/a/b/");
        assert_eq!(normalize_pathname("users/"), "/users");
        assert_eq!(normalize_pathname("/"), "/");
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("..", "/a/b").pathname, "/a");
        assert_eq!(resolve_path("./c", "/a/b").pathname, "/a/b/c");
        assert_eq!(resolve_path("../../..", "/a/b").pathname, "/");
        let path = resolve_path("?x=1", "/a");
        assert_eq!(path.pathname, "/a");
        assert_eq!(path.search, "?x=1");
    }

    #[test]
    fn test_generate_path() {
        let params: RouteParams = [("id", "7"), ("*", "a/b")].into_iter().collect();
        assert_eq!(generate_path("/users/:id", &params).unwrap(), "/users/7");
        assert_eq!(generate_path("/files/*", &params).unwrap(), "/files/a/b");
        assert!(generate_path("/posts/:postId", &params).is_err());
    }
}
