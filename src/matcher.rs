//! Route matching
//!
//! Ranked branches are tried in order; the first branch whose every segment
//! matches wins. Each route in the branch is matched against what is left of
//! the pathname after its parent's `pathname_base`.

use crate::branch::RouteBranch;
use crate::location::parse_path;
use crate::manifest::{DataRoute, DataRoutes};
use crate::params::{RouteParams, SearchParams};
use crate::path::{decode_path, join_paths, normalize_pathname, PathPattern};
use crate::{trace_log, warn_log};
use std::fmt;
use std::sync::Arc;

/// Id of the placeholder route used when an error must be shown and no
/// registered route can hold it.
pub const SHIM_ERROR_ROUTE_ID: &str = "__shim-error-route__";

/// One matched route in a chain.
#[derive(Clone)]
pub struct RouteMatch {
    /// Params of the whole chain, root to leaf
    pub params: RouteParams,
    /// Portion of the URL pathname matched by this route and its ancestors
    pub pathname: String,
    /// `pathname` before any splat
    pub pathname_base: String,
    pub route: Arc<DataRoute>,
}

impl RouteMatch {
    pub fn route_id(&self) -> &str {
        &self.route.id
    }
}

impl PartialEq for RouteMatch {
    fn eq(&self, other: &Self) -> bool {
        self.route.id == other.route.id
            && self.params == other.params
            && self.pathname == other.pathname
            && self.pathname_base == other.pathname_base
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("route", &self.route.id)
            .field("params", &self.params)
            .field("pathname", &self.pathname)
            .field("pathname_base", &self.pathname_base)
            .finish()
    }
}

/// Strip `basename` from the front of `pathname`, case-insensitively.
///
/// Fails closed: `None` unless the basename is followed by `/` or the end.
///
/// ```
/// use datarouter::strip_basename;
///
/// assert_eq!(strip_basename("/app/users", "/app"), Some("/users"));
/// assert_eq!(strip_basename("/APP", "/app"), Some("/"));
/// assert_eq!(strip_basename("/application", "/app"), None);
/// ```
pub fn strip_basename<'a>(pathname: &'a str, basename: &str) -> Option<&'a str> {
    if basename == "/" || basename.is_empty() {
        return Some(pathname);
    }
    let prefix = pathname.get(..basename.len())?;
    if !prefix.eq_ignore_ascii_case(basename) {
        return None;
    }
    let start = if basename.ends_with('/') {
        basename.len() - 1
    } else {
        basename.len()
    };
    let rest = &pathname[start..];
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(if rest.is_empty() { "/" } else { rest })
}

/// Match a location (`pathname[?search][#hash]`) against the route tree.
pub fn match_routes(routes: &DataRoutes, location: &str, basename: &str) -> Option<Vec<RouteMatch>> {
    match_routes_impl(routes, location, basename, false)
}

/// Like [`match_routes`], but the final segment of a non-index leaf may match
/// a prefix. Used for on-demand route discovery.
pub fn match_routes_partial(
    routes: &DataRoutes,
    location: &str,
    basename: &str,
) -> Option<Vec<RouteMatch>> {
    match_routes_impl(routes, location, basename, true)
}

fn match_routes_impl(
    routes: &DataRoutes,
    location: &str,
    basename: &str,
    allow_partial: bool,
) -> Option<Vec<RouteMatch>> {
    let path = parse_path(location);
    let pathname = if path.pathname.is_empty() {
        "/"
    } else {
        path.pathname.as_str()
    };
    let pathname = strip_basename(pathname, basename)?;
    let decoded = decode_path(pathname);

    let matches = routes
        .branches()
        .iter()
        .find_map(|branch| match_route_branch(routes, branch, &decoded, allow_partial));
    if matches.is_none() {
        trace_log!("No branch matched '{}'", decoded);
    }
    matches
}

/// Match one branch against a decoded pathname.
pub fn match_route_branch(
    routes: &DataRoutes,
    branch: &RouteBranch,
    pathname: &str,
    allow_partial: bool,
) -> Option<Vec<RouteMatch>> {
    let meta_count = branch.routes_meta.len();
    let leaf_is_index = branch
        .routes_meta
        .last()
        .and_then(|meta| routes.get(&meta.route_id))
        .is_some_and(|route| route.index);

    let mut matched_params = RouteParams::new();
    let mut matched_pathname = "/".to_string();
    let mut matches: Vec<RouteMatch> = Vec::with_capacity(meta_count);

    for (i, meta) in branch.routes_meta.iter().enumerate() {
        let end = i == meta_count - 1;
        let remaining = if matched_pathname == "/" {
            pathname
        } else {
            pathname
                .get(matched_pathname.len()..)
                .filter(|rest| !rest.is_empty())
                .unwrap_or("/")
        };

        let mut path_match = match_segment(routes, &meta.relative_path, meta.case_sensitive, end, remaining);
        if path_match.is_none() && end && allow_partial && !leaf_is_index {
            path_match = match_segment(routes, &meta.relative_path, meta.case_sensitive, false, remaining);
        }
        let path_match = path_match?;
        let route = routes.get(&meta.route_id)?;

        matched_params.merge(&path_match.params);
        matches.push(RouteMatch {
            params: RouteParams::new(),
            pathname: join_paths(&[matched_pathname.as_str(), path_match.pathname.as_str()]),
            pathname_base: normalize_pathname(&join_paths(&[
                matched_pathname.as_str(),
                path_match.pathname_base.as_str(),
            ])),
            route: Arc::clone(route),
        });

        if path_match.pathname_base != "/" {
            matched_pathname = join_paths(&[matched_pathname.as_str(), path_match.pathname_base.as_str()]);
        }
    }

    // Every match exposes the params of the whole chain.
    for route_match in &mut matches {
        route_match.params = matched_params.clone();
    }
    Some(matches)
}

fn match_segment(
    routes: &DataRoutes,
    path: &str,
    case_sensitive: bool,
    end: bool,
    pathname: &str,
) -> Option<crate::path::PathMatch> {
    match routes.compile(path, case_sensitive, end) {
        Ok(compiled) => {
            let pattern = PathPattern::new(path).case_sensitive(case_sensitive).end(end);
            compiled.match_pathname(&pattern, pathname)
        }
        Err(e) => {
            warn_log!("{}", e);
            None
        }
    }
}

/// Whether the search has a value-less `index` param, which selects an index
/// route over its parent layout.
pub fn has_naked_index_query(search: &str) -> bool {
    SearchParams::parse(search).has_naked("index")
}

/// Matches that contribute to the URL: the root plus every match with a path.
pub fn path_contributing_matches(matches: &[RouteMatch]) -> Vec<&RouteMatch> {
    matches
        .iter()
        .enumerate()
        .filter(|(i, m)| *i == 0 || m.route.path.as_deref().is_some_and(|p| !p.is_empty()))
        .map(|(_, m)| m)
        .collect()
}

/// The match a submission or fetch targets: an index leaf when `?index` is
/// present, otherwise the deepest path-contributing match.
pub fn get_target_match<'a>(matches: &'a [RouteMatch], search: &str) -> Option<&'a RouteMatch> {
    let leaf = matches.last()?;
    if leaf.route.index && has_naked_index_query(search) {
        return Some(leaf);
    }
    path_contributing_matches(matches).last().copied()
}

/// A one-match chain used to attach a 404/405 when nothing (or nothing
/// usable) matched: the only root, else the first root that is an index, is
/// pathless or has path `/`, else a placeholder.
pub fn short_circuit_matches(routes: &DataRoutes) -> Vec<RouteMatch> {
    let roots: Vec<&Arc<DataRoute>> = routes.roots().collect();
    let route = if roots.len() == 1 {
        Arc::clone(roots[0])
    } else {
        roots
            .iter()
            .find(|r| r.index || r.path.as_deref().map_or(true, |p| p.is_empty() || p == "/"))
            .map(|r| Arc::clone(r))
            .unwrap_or_else(|| Arc::new(DataRoute::shim(SHIM_ERROR_ROUTE_ID)))
    };
    vec![RouteMatch {
        params: RouteParams::new(),
        pathname: String::new(),
        pathname_base: String::new(),
        route,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;

    fn ids(matches: &[RouteMatch]) -> Vec<&str> {
        matches.iter().map(RouteMatch::route_id).collect()
    }

    fn app() -> DataRoutes {
        DataRoutes::new(vec![Route::new("/").id("root").children(vec![
            Route::index().id("home"),
            Route::new("users").id("users").children(vec![
                Route::index().id("users-index"),
                Route::new(":userId").id("user"),
            ]),
            Route::new("files/*").id("files"),
            Route::layout().id("auth").children(vec![Route::new("login").id("login")]),
        ])])
        .unwrap()
    }

    #[test]
    fn test_nested_match_chain() {
        let routes = app();
        let matches = match_routes(&routes, "/users/42", "/").unwrap();
        assert_eq!(ids(&matches), vec!["root", "users", "user"]);
        assert_eq!(matches[0].pathname, "/");
        assert_eq!(matches[1].pathname, "/users");
        assert_eq!(matches[2].pathname, "/users/42");
        for m in &matches {
            assert_eq!(m.params.get("userId"), Some("42"));
        }
    }

    #[test]
    fn test_index_routes() {
        let routes = app();
        assert_eq!(ids(&match_routes(&routes, "/", "/").unwrap()), vec!["root", "home"]);
        assert_eq!(
            ids(&match_routes(&routes, "/users/", "/").unwrap()),
            vec!["root", "users", "users-index"]
        );
    }

    #[test]
    fn test_pathless_layout() {
        let routes = app();
        assert_eq!(
            ids(&match_routes(&routes, "/login?next=/", "/").unwrap()),
            vec!["root", "auth", "login"]
        );
    }

    #[test]
    fn test_splat_pathname_base() {
        let routes = app();
        let matches = match_routes(&routes, "/files/a/b.txt", "/").unwrap();
        let leaf = matches.last().unwrap();
        assert_eq!(leaf.params.splat(), Some("a/b.txt"));
        assert_eq!(leaf.pathname, "/files/a/b.txt");
        assert_eq!(leaf.pathname_base, "/files");
    }

    #[test]
    fn test_no_match() {
        assert!(match_routes(&app(), "/nope/nope", "/").is_none());
    }

    #[test]
    fn test_basename() {
        let routes = app();
        let matches = match_routes(&routes, "/base/users/1", "/base").unwrap();
        assert_eq!(ids(&matches), vec!["root", "users", "user"]);
        assert!(match_routes(&routes, "/basement/users/1", "/base").is_none());
        assert!(match_routes(&routes, "/users/1", "/base").is_none());
    }

    #[test]
    fn test_partial_matching() {
        let routes = app();
        assert!(match_routes(&routes, "/users/1/settings", "/").is_none());
        let partial = match_routes_partial(&routes, "/users/1/settings", "/").unwrap();
        assert_eq!(ids(&partial), vec!["root", "users", "user"]);
    }

    #[test]
    fn test_target_match() {
        let routes = app();
        let matches = match_routes(&routes, "/users", "/").unwrap();
        assert_eq!(get_target_match(&matches, "").unwrap().route_id(), "users");
        assert_eq!(get_target_match(&matches, "?index").unwrap().route_id(), "users-index");
        assert_eq!(get_target_match(&matches, "?index=1").unwrap().route_id(), "users");
    }

    #[test]
    fn test_short_circuit_matches() {
        let routes = app();
        let matches = short_circuit_matches(&routes);
        assert_eq!(ids(&matches), vec!["root"]);

        let routes = DataRoutes::new(vec![Route::new("/a"), Route::new("/b")]).unwrap();
        assert_eq!(ids(&short_circuit_matches(&routes)), vec![SHIM_ERROR_ROUTE_ID]);
    }
}
