//! Registered route trees
//!
//! [`DataRoutes`] turns a tree of [`Route`] definitions into a flat manifest
//! of [`DataRoute`]s keyed by id, plus the ranked branches used for matching.
//! Routes without an explicit id get one from their position in the tree
//! (`"0"`, `"0-1"`, `"0-1-2"`, ...).

use crate::branch::{flatten_routes, rank_route_branches, RouteBranch};
#[cfg(feature = "cache")]
use crate::cache::PatternCache;
use crate::error::RouterError;
use crate::middleware::BoxedMiddleware;
use crate::params::RouteParams;
use crate::path::{generate_path, join_paths, CompiledPath};
use crate::route::{validate_route_path, Handler, HandlerKind, Route, ShouldRevalidateFn};
use crate::{debug_log, trace_log};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Route id to registered route.
pub type RouteManifest = HashMap<String, Arc<DataRoute>>;

/// A registered route.
#[derive(Clone)]
pub struct DataRoute {
    pub id: String,
    pub parent_id: Option<String>,
    pub path: Option<String>,
    pub index: bool,
    pub case_sensitive: bool,
    /// Child ids in declaration order
    pub children: Vec<String>,
    pub loader: Option<Handler>,
    pub action: Option<Handler>,
    pub middleware: Vec<BoxedMiddleware>,
    pub should_revalidate: Option<ShouldRevalidateFn>,
    pub has_error_boundary: bool,
    pub handle: Option<Value>,
}

impl DataRoute {
    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn handler(&self, kind: HandlerKind) -> Option<&Handler> {
        match kind {
            HandlerKind::Loader => self.loader.as_ref(),
            HandlerKind::Action => self.action.as_ref(),
        }
    }

    pub(crate) fn handler_mut(&mut self, kind: HandlerKind) -> &mut Option<Handler> {
        match kind {
            HandlerKind::Loader => &mut self.loader,
            HandlerKind::Action => &mut self.action,
        }
    }

    /// Placeholder used to attach an error when no route can hold it.
    pub(crate) fn shim(id: &str) -> Self {
        Self {
            id: id.to_string(),
            parent_id: None,
            path: None,
            index: false,
            case_sensitive: false,
            children: Vec::new(),
            loader: None,
            action: None,
            middleware: Vec::new(),
            should_revalidate: None,
            has_error_boundary: true,
            handle: None,
        }
    }
}

impl fmt::Debug for DataRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRoute")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("children", &self.children)
            .field("has_loader", &self.loader.is_some())
            .field("has_action", &self.action.is_some())
            .field("has_error_boundary", &self.has_error_boundary)
            .finish()
    }
}

/// A registered route tree with precomputed branches.
#[derive(Clone)]
pub struct DataRoutes {
    manifest: RouteManifest,
    roots: Vec<String>,
    branches: Vec<RouteBranch>,
    #[cfg(feature = "cache")]
    cache: Arc<PatternCache>,
}

impl DataRoutes {
    /// Register a route tree.
    pub fn new(routes: Vec<Route>) -> Result<Self, RouterError> {
        let mut built = HashMap::new();
        let empty = RouteManifest::new();
        let roots = convert_routes(routes, None, &[], &empty, &mut built)?;
        let manifest = built
            .into_iter()
            .map(|(id, route)| (id, Arc::new(route)))
            .collect();

        let mut data_routes = Self {
            manifest,
            roots,
            branches: Vec::new(),
            #[cfg(feature = "cache")]
            cache: Arc::new(PatternCache::new()),
        };
        data_routes.rebuild_branches()?;
        debug_log!(
            "Registered {} routes ({} branches)",
            data_routes.manifest.len(),
            data_routes.branches.len()
        );
        Ok(data_routes)
    }

    fn rebuild_branches(&mut self) -> Result<(), RouterError> {
        let mut branches = flatten_routes(&self.manifest, &self.roots)?;
        rank_route_branches(&mut branches);
        self.branches = branches;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<DataRoute>> {
        self.manifest.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.manifest.contains_key(id)
    }

    /// Top-level routes in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = &Arc<DataRoute>> {
        self.roots.iter().filter_map(|id| self.manifest.get(id))
    }

    pub fn root_ids(&self) -> &[String] {
        &self.roots
    }

    pub fn children<'a>(&'a self, route: &'a DataRoute) -> impl Iterator<Item = &'a Arc<DataRoute>> {
        route.children.iter().filter_map(|id| self.manifest.get(id))
    }

    /// Ranked branches, best first.
    pub fn branches(&self) -> &[RouteBranch] {
        &self.branches
    }

    pub fn manifest(&self) -> &RouteManifest {
        &self.manifest
    }

    pub(crate) fn manifest_mut(&mut self) -> &mut RouteManifest {
        &mut self.manifest
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Compile a pattern, through the cache when enabled.
    pub(crate) fn compile(
        &self,
        path: &str,
        case_sensitive: bool,
        end: bool,
    ) -> Result<CompiledPath, RouterError> {
        #[cfg(feature = "cache")]
        {
            self.cache.get_or_compile(path, case_sensitive, end)
        }
        #[cfg(not(feature = "cache"))]
        {
            crate::path::compile_path(path, case_sensitive, end)
        }
    }

    #[cfg(feature = "cache")]
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// The full pattern of a route: its ancestors' paths joined with its own.
    pub fn full_path(&self, id: &str) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = self.manifest.get(id)?;
        loop {
            if let Some(path) = current.path.as_deref() {
                if path.starts_with('/') {
                    parts.push(path.to_string());
                    break;
                }
                parts.push(path.to_string());
            }
            match current.parent_id.as_deref().and_then(|p| self.manifest.get(p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        parts.push("/".to_string());
        parts.reverse();
        Some(join_paths(&parts))
    }

    /// Build a URL for a route by interpolating params into its full pattern.
    pub fn url_for(&self, id: &str, params: &RouteParams) -> Result<String, RouterError> {
        let pattern = self
            .full_path(id)
            .ok_or_else(|| RouterError::UnknownRoute(id.to_string()))?;
        generate_path(&pattern, params)
    }

    /// Add children under `parent_id` (or at the top level), skipping routes
    /// that are already present. Returns whether anything was added.
    ///
    /// Derived ids of patched routes take the form `<parent>-patch-<n>-<i>`.
    pub fn patch_routes(
        &mut self,
        parent_id: Option<&str>,
        children: Vec<Route>,
    ) -> Result<bool, RouterError> {
        let siblings = match parent_id {
            Some(id) => self
                .manifest
                .get(id)
                .ok_or_else(|| RouterError::UnknownRoute(id.to_string()))?
                .children
                .clone(),
            None => self.roots.clone(),
        };

        let unique: Vec<Route> = children
            .into_iter()
            .filter(|new_route| {
                !siblings.iter().any(|id| {
                    self.manifest
                        .get(id)
                        .is_some_and(|existing| self.is_same_route(new_route, existing))
                })
            })
            .collect();
        if unique.is_empty() {
            trace_log!("Patch for {:?} added no new routes", parent_id);
            return Ok(false);
        }

        let tree_path = vec![
            parent_id.unwrap_or("").to_string(),
            "patch".to_string(),
            siblings.len().to_string(),
        ];
        let tree_path: Vec<String> = tree_path.into_iter().filter(|s| !s.is_empty()).collect();
        let mut built = HashMap::new();
        let new_ids = convert_routes(unique, parent_id, &tree_path, &self.manifest, &mut built)?;

        let mut next = self.clone();
        for (id, route) in built {
            next.manifest.insert(id, Arc::new(route));
        }
        match parent_id {
            Some(id) => {
                if let Some(parent) = next.manifest.get_mut(id) {
                    Arc::make_mut(parent).children.extend(new_ids.iter().cloned());
                }
            }
            None => next.roots.extend(new_ids.iter().cloned()),
        }
        next.rebuild_branches()?;

        debug_log!("Patched {} routes under {:?}", new_ids.len(), parent_id);
        *self = next;
        Ok(true)
    }

    fn is_same_route(&self, new_route: &Route, existing: &DataRoute) -> bool {
        if new_route.id.as_deref() == Some(existing.id.as_str()) {
            return true;
        }
        if new_route.index != existing.index
            || new_route.path != existing.path
            || new_route.case_sensitive != existing.case_sensitive
        {
            return false;
        }
        if new_route.children.is_empty() && existing.children.is_empty() {
            return true;
        }
        new_route.children.iter().all(|new_child| {
            self.children(existing)
                .any(|existing_child| self.is_same_route(new_child, existing_child))
        })
    }
}

impl fmt::Debug for DataRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRoutes")
            .field("roots", &self.roots)
            .field("routes", &self.manifest.len())
            .field("branches", &self.branches.len())
            .finish()
    }
}

fn convert_routes(
    routes: Vec<Route>,
    parent_id: Option<&str>,
    parent_tree_path: &[String],
    existing: &RouteManifest,
    out: &mut HashMap<String, DataRoute>,
) -> Result<Vec<String>, RouterError> {
    let mut ids = Vec::with_capacity(routes.len());
    for (index, route) in routes.into_iter().enumerate() {
        let mut tree_path = parent_tree_path.to_vec();
        tree_path.push(index.to_string());
        let id = route.id.clone().unwrap_or_else(|| tree_path.join("-"));

        if route.index && !route.children.is_empty() {
            return Err(RouterError::IndexRouteWithChildren {
                path: route.path.clone().unwrap_or_default(),
            });
        }
        if existing.contains_key(&id) || out.contains_key(&id) {
            return Err(RouterError::DuplicateRouteId(id));
        }
        if let Some(path) = route.path.as_deref() {
            validate_route_path(path)?;
        }

        let Route {
            path,
            index: is_index,
            case_sensitive,
            children,
            loader,
            action,
            middleware,
            should_revalidate,
            has_error_boundary,
            handle,
            ..
        } = route;

        out.insert(
            id.clone(),
            DataRoute {
                id: id.clone(),
                parent_id: parent_id.map(str::to_string),
                path,
                index: is_index,
                case_sensitive,
                children: Vec::new(),
                loader,
                action,
                middleware,
                should_revalidate,
                has_error_boundary,
                handle,
            },
        );

        let child_ids = convert_routes(children, Some(&id), &tree_path, existing, out)?;
        if let Some(data_route) = out.get_mut(&id) {
            data_route.children = child_ids;
        }
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Vec<Route> {
        vec![Route::new("/").children(vec![
            Route::index(),
            Route::new("users").id("users").children(vec![Route::new(":id")]),
        ])]
    }

    #[test]
    fn test_ids_from_tree_position() {
        let routes = DataRoutes::new(tree()).unwrap();
        assert!(routes.contains("0"));
        assert!(routes.contains("0-0"));
        assert!(routes.contains("users"));
        assert!(routes.contains("0-1-0"));
        assert_eq!(routes.get("0-1-0").unwrap().parent_id.as_deref(), Some("users"));
        assert_eq!(routes.get("0").unwrap().children, vec!["0-0", "users"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = DataRoutes::new(vec![Route::new("/a").id("x"), Route::new("/b").id("x")]);
        assert!(matches!(result, Err(RouterError::DuplicateRouteId(id)) if id == "x"));

        let result = DataRoutes::new(vec![Route::new("/a").id("x").child(Route::new("b").id("x"))]);
        assert!(matches!(result, Err(RouterError::DuplicateRouteId(_))));
    }

    #[test]
    fn test_index_with_children_rejected() {
        let mut index = Route::index();
        index.children.push(Route::new("x"));
        let result = DataRoutes::new(vec![Route::new("/").child(index)]);
        assert!(matches!(result, Err(RouterError::IndexRouteWithChildren { .. })));
    }

    #[test]
    fn test_full_path_and_url_for() {
        let routes = DataRoutes::new(tree()).unwrap();
        assert_eq!(routes.full_path("0-1-0").unwrap(), "/users/:id");
        let params: RouteParams = [("id", "9")].into_iter().collect();
        assert_eq!(routes.url_for("0-1-0", &params).unwrap(), "/users/9");
        assert!(routes.url_for("missing", &params).is_err());
    }

    #[test]
    fn test_patch_routes_dedup_and_ids() {
        let mut routes = DataRoutes::new(tree()).unwrap();
        let added = routes
            .patch_routes(Some("users"), vec![Route::new("new"), Route::new(":id")])
            .unwrap();
        assert!(added);
        assert!(routes.contains("users-patch-1-0"));
        assert_eq!(routes.get("users").unwrap().children.len(), 2);

        let added = routes.patch_routes(Some("users"), vec![Route::new("new")]).unwrap();
        assert!(!added);

        assert!(routes.patch_routes(Some("nope"), vec![]).is_err());
    }

    #[test]
    fn test_patch_top_level() {
        let mut routes = DataRoutes::new(tree()).unwrap();
        routes.patch_routes(None, vec![Route::new("/about")]).unwrap();
        assert!(routes.contains("patch-1-0"));
        assert_eq!(routes.root_ids().len(), 2);
    }
}
