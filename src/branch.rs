//! Branch flattening and ranking
//!
//! A branch is one root-to-leaf chain of routes, matched as a unit. Routes
//! with optional segments contribute one branch per presence/absence
//! combination. Branches are scored once and ranked so that matching is a
//! linear scan that stops at the first hit.
//!
//! Scoring:
//! - start from the number of `/`-separated segments
//! - `-2` if the path has a splat
//! - `+2` if the leaf is an index route
//! - per non-splat segment: `+10` static, `+3` dynamic, `+1` empty

use crate::error::RouterError;
use crate::manifest::{DataRoute, RouteManifest};
use crate::path::join_paths;
use std::cmp::Ordering;

const DYNAMIC_SEGMENT_VALUE: i32 = 3;
const INDEX_ROUTE_VALUE: i32 = 2;
const EMPTY_SEGMENT_VALUE: i32 = 1;
const STATIC_SEGMENT_VALUE: i32 = 10;
const SPLAT_PENALTY: i32 = -2;

/// One route's contribution to a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMeta {
    /// Pattern relative to the parent, absolute prefixes stripped
    pub relative_path: String,
    pub case_sensitive: bool,
    /// Position among the route's siblings
    pub children_index: usize,
    pub route_id: String,
}

/// A flattened root-to-leaf chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBranch {
    pub path: String,
    pub score: i32,
    pub routes_meta: Vec<RouteMeta>,
}

/// Flatten the routes under `ids` into unranked branches.
///
/// Children are flattened before their parent's own branch. Pathless layout
/// routes only contribute through their children.
pub fn flatten_routes(
    manifest: &RouteManifest,
    ids: &[String],
) -> Result<Vec<RouteBranch>, RouterError> {
    let mut branches = Vec::new();
    flatten_into(manifest, ids, &mut branches, &[], "", false)?;
    Ok(branches)
}

fn flatten_into(
    manifest: &RouteManifest,
    ids: &[String],
    branches: &mut Vec<RouteBranch>,
    parents_meta: &[RouteMeta],
    parent_path: &str,
    has_parent_optional_segments: bool,
) -> Result<(), RouterError> {
    for (index, id) in ids.iter().enumerate() {
        let route = manifest
            .get(id)
            .ok_or_else(|| RouterError::UnknownRoute(id.clone()))?;
        let context = FlattenContext {
            manifest,
            parents_meta,
            parent_path,
        };
        match route.path.as_deref() {
            Some(path) if !path.is_empty() && path.contains('?') => {
                for exploded in explode_optional_segments(path) {
                    context.flatten_route(route, index, branches, true, Some(exploded))?;
                }
            }
            _ => context.flatten_route(route, index, branches, has_parent_optional_segments, None)?,
        }
    }
    Ok(())
}

struct FlattenContext<'a> {
    manifest: &'a RouteManifest,
    parents_meta: &'a [RouteMeta],
    parent_path: &'a str,
}

impl FlattenContext<'_> {
    fn flatten_route(
        &self,
        route: &DataRoute,
        index: usize,
        branches: &mut Vec<RouteBranch>,
        has_parent_optional_segments: bool,
        relative_path: Option<String>,
    ) -> Result<(), RouterError> {
        let mut relative_path =
            relative_path.unwrap_or_else(|| route.path.clone().unwrap_or_default());

        if relative_path.starts_with('/') {
            if !relative_path.starts_with(self.parent_path) {
                // An absolute child of one exploded optional variant may not
                // fit under the other variants.
                if has_parent_optional_segments {
                    return Ok(());
                }
                return Err(RouterError::AbsolutePathMismatch {
                    path: relative_path,
                    parent: self.parent_path.to_string(),
                });
            }
            relative_path = relative_path[self.parent_path.len()..].to_string();
        }

        let path = join_paths(&[self.parent_path, relative_path.as_str()]);
        let mut routes_meta = self.parents_meta.to_vec();
        routes_meta.push(RouteMeta {
            relative_path,
            case_sensitive: route.case_sensitive,
            children_index: index,
            route_id: route.id.clone(),
        });

        if !route.children.is_empty() {
            if route.index {
                return Err(RouterError::IndexRouteWithChildren { path });
            }
            flatten_into(
                self.manifest,
                &route.children,
                branches,
                &routes_meta,
                &path,
                has_parent_optional_segments,
            )?;
        }

        if route.path.is_none() && !route.index {
            return Ok(());
        }

        branches.push(RouteBranch {
            score: compute_score(&path, route.index),
            path,
            routes_meta,
        });
        Ok(())
    }
}

/// Expand every `segment?` into its present and absent forms.
///
/// Combinations that keep an optional segment come before the ones that drop
/// it, recursively, so more specific variants are tried first.
///
/// ```
/// use datarouter::explode_optional_segments;
///
/// assert_eq!(
///     explode_optional_segments("/:lang?/about"),
///     vec!["/:lang/about", "/about"],
/// );
/// ```
pub fn explode_optional_segments(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').collect();
    let Some((first, rest)) = segments.split_first() else {
        return Vec::new();
    };

    let is_optional = first.ends_with('?');
    let required = first.strip_suffix('?').unwrap_or(first);

    if rest.is_empty() {
        return if is_optional {
            vec![required.to_string(), String::new()]
        } else {
            vec![required.to_string()]
        };
    }

    let rest_exploded = explode_optional_segments(&rest.join("/"));
    let mut result: Vec<String> = rest_exploded
        .iter()
        .map(|subpath| {
            if subpath.is_empty() {
                required.to_string()
            } else {
                format!("{}/{}", required, subpath)
            }
        })
        .collect();
    if is_optional {
        result.extend(rest_exploded);
    }

    result
        .into_iter()
        .map(|exploded| {
            if path.starts_with('/') && exploded.is_empty() {
                "/".to_string()
            } else {
                exploded
            }
        })
        .collect()
}

fn is_dynamic_segment(segment: &str) -> bool {
    segment.strip_prefix(':').is_some_and(|name| {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

/// Score a fully expanded branch path.
pub fn compute_score(path: &str, index: bool) -> i32 {
    let segments: Vec<&str> = path.split('/').collect();
    let mut score = segments.len() as i32;
    if segments.iter().any(|s| *s == "*") {
        score += SPLAT_PENALTY;
    }
    if index {
        score += INDEX_ROUTE_VALUE;
    }
    segments
        .iter()
        .filter(|s| **s != "*")
        .fold(score, |score, segment| {
            score
                + if is_dynamic_segment(segment) {
                    DYNAMIC_SEGMENT_VALUE
                } else if segment.is_empty() {
                    EMPTY_SEGMENT_VALUE
                } else {
                    STATIC_SEGMENT_VALUE
                }
        })
}

/// Order sibling branches by declaration; anything else is a tie.
fn compare_indexes(a: &[usize], b: &[usize]) -> Ordering {
    let siblings = a.len() == b.len() && a[..a.len().saturating_sub(1)] == b[..b.len().saturating_sub(1)];
    match (siblings, a.last(), b.last()) {
        (true, Some(x), Some(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Rank branches best first: higher score wins; equal scores between true
/// siblings go to the earlier-declared one; other ties keep their order.
pub fn rank_route_branches(branches: &mut [RouteBranch]) {
    branches.sort_by(|a, b| b.score.cmp(&a.score));

    // The sibling rule is not a total order, so it is applied by a stable
    // insertion pass inside each run of equal scores.
    let mut start = 0;
    while start < branches.len() {
        let score = branches[start].score;
        let end = branches[start..]
            .iter()
            .position(|b| b.score != score)
            .map_or(branches.len(), |offset| start + offset);
        insertion_sort_siblings(&mut branches[start..end]);
        start = end;
    }
}

fn insertion_sort_siblings(run: &mut [RouteBranch]) {
    let indexes = |branch: &RouteBranch| -> Vec<usize> {
        branch.routes_meta.iter().map(|m| m.children_index).collect()
    };
    for i in 1..run.len() {
        let mut j = i;
        while j > 0 && compare_indexes(&indexes(&run[j]), &indexes(&run[j - 1])) == Ordering::Less {
            run.swap(j, j - 1);
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DataRoutes;
    use crate::route::Route;

    fn branch_paths(routes: Vec<Route>) -> Vec<String> {
        DataRoutes::new(routes)
            .unwrap()
            .branches()
            .iter()
            .map(|b| b.path.clone())
            .collect()
    }

    #[test]
    fn test_compute_score() {
        assert_eq!(compute_score("/", false), 2 + 1 + 1);
        assert_eq!(compute_score("/users", false), 2 + 1 + 10);
        assert_eq!(compute_score("/users/:id", false), 3 + 1 + 10 + 3);
        assert_eq!(compute_score("/files/*", false), 3 - 2 + 1 + 10);
        assert_eq!(compute_score("/users", true), 2 + 2 + 1 + 10);
    }

    #[test]
    fn test_explode_counts() {
        assert_eq!(explode_optional_segments("/a"), vec!["/a"]);
        assert_eq!(explode_optional_segments("/:a?"), vec!["/:a", "/"]);
        let exploded = explode_optional_segments("/:a?/:b?/:c?");
        assert_eq!(exploded.len(), 8);
        assert_eq!(exploded[0], "/:a/:b/:c");
        assert_eq!(exploded[7], "/");
    }

    #[test]
    fn test_explode_order_keeps_required_first() {
        assert_eq!(
            explode_optional_segments("/:lang?/docs/:page?"),
            vec!["/:lang/docs/:page", "/:lang/docs", "/docs/:page", "/docs"]
        );
    }

    #[test]
    fn test_children_flatten_before_parent() {
        let routes = vec![Route::new("/").id("root").children(vec![
            Route::new("a"),
            Route::layout().child(Route::new("b")),
        ])];
        let routes = DataRoutes::new(routes).unwrap();
        let mut unranked = flatten_routes(routes.manifest(), routes.root_ids()).unwrap();
        let paths: Vec<_> = unranked.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b", "/"]);

        // the pathless layout has no branch of its own
        rank_route_branches(&mut unranked);
        assert_eq!(unranked.len(), 3);
    }

    #[test]
    fn test_rank_static_over_dynamic_over_splat() {
        let paths = branch_paths(vec![
            Route::new("/*"),
            Route::new("/users/:id"),
            Route::new("/users/new"),
        ]);
        assert_eq!(paths, vec!["/users/new", "/users/:id", "/*"]);
    }

    #[test]
    fn test_sibling_tie_break_by_declaration() {
        let routes = DataRoutes::new(vec![Route::new("/").children(vec![
            Route::new("other/:x").id("first"),
            Route::new("other/:y").id("second"),
        ])])
        .unwrap();
        let leaf_ids: Vec<_> = routes
            .branches()
            .iter()
            .map(|b| b.routes_meta.last().unwrap().route_id.as_str())
            .collect();
        let first = leaf_ids.iter().position(|id| *id == "first").unwrap();
        let second = leaf_ids.iter().position(|id| *id == "second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_absolute_child_must_extend_parent() {
        let result = DataRoutes::new(vec![Route::new("/admin").child(Route::new("/users"))]);
        assert!(matches!(result, Err(RouterError::AbsolutePathMismatch { .. })));

        let ok = branch_paths(vec![Route::new("/admin").child(Route::new("/admin/users"))]);
        assert!(ok.contains(&"/admin/users".to_string()));
    }

    #[test]
    fn test_absolute_child_under_optional_parent_is_pruned() {
        let paths = branch_paths(vec![
            Route::new("/:lang?/docs").child(Route::new("/:lang/docs/x"))
        ]);
        assert_eq!(paths.iter().filter(|p| *p == "/:lang/docs/x").count(), 1);
        assert!(paths.contains(&"/docs".to_string()));
    }
}
