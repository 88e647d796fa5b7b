//! Stateless server-side queries
//!
//! A [`StaticHandler`] runs the action, revalidation and loader pipeline of
//! the client router once per request and keeps nothing between requests.
//! The result is either a [`StaticHandlerContext`] to render from or a
//! redirect [`Response`].
//!
//! ```
//! use datarouter::{QueryOptions, QueryResult, Request, Route, StaticHandler, StaticHandlerOptions};
//! use serde_json::json;
//!
//! let handler = StaticHandler::new(
//!     vec![Route::new("/").id("root").loader(|_| async { Ok(json!({"user": "ada"})) })],
//!     StaticHandlerOptions::new(),
//! )
//! .unwrap();
//!
//! let request = Request::get("http://localhost/").unwrap();
//! let result = pollster::block_on(handler.query(request, QueryOptions::new())).unwrap();
//! let QueryResult::Context(context) = result else { panic!("unexpected redirect") };
//! assert_eq!(context.loader_data["root"], json!({"user": "ada"}));
//! assert_eq!(context.status_code, 200);
//! ```

use crate::context::{ContextFactory, RouterContextProvider};
use crate::data::{
    find_nearest_boundary, find_redirect, get_loader_matches_until_boundary, process_loader_data, run_data_strategy,
    DataResult, DataResults, DataStrategy, DataStrategyArgs, DataStrategyMatch, DefaultDataStrategy, DeferredData,
    Redirect,
};
use crate::error::{ErrorResponse, RouteError, RouterError};
use crate::location::Location;
use crate::manifest::DataRoutes;
use crate::matcher::{get_target_match, match_routes, short_circuit_matches, RouteMatch};
use crate::request::{FormMethod, Request, RequestBody, Response};
use crate::route::{HandlerKind, Route};
use crate::router::leaf_params;
use crate::{debug_log, trace_log};
use http::{HeaderMap, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Options
// ============================================================================

/// Construction options for a [`StaticHandler`].
#[derive(Clone)]
pub struct StaticHandlerOptions {
    pub basename: String,
    pub data_strategy: Arc<dyn DataStrategy>,
    /// Builds the context of each query that does not bring its own
    pub context: Option<ContextFactory>,
}

impl StaticHandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = basename.into();
        self
    }

    pub fn data_strategy(mut self, strategy: impl DataStrategy) -> Self {
        self.data_strategy = Arc::new(strategy);
        self
    }

    pub fn context<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> RouterContextProvider + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(factory));
        self
    }
}

impl Default for StaticHandlerOptions {
    fn default() -> Self {
        Self {
            basename: "/".to_string(),
            data_strategy: Arc::new(DefaultDataStrategy),
            context: None,
        }
    }
}

impl fmt::Debug for StaticHandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHandlerOptions")
            .field("basename", &self.basename)
            .field("context", &self.context.is_some())
            .finish()
    }
}

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Only run the loaders of these routes
    pub route_ids: Option<Vec<String>>,
    /// Report a loader error on the route that threw instead of its boundary
    pub skip_loader_error_bubbling: bool,
    /// Run the action only, no loaders afterwards
    pub skip_revalidation: bool,
    pub context: Option<RouterContextProvider>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn skip_loader_error_bubbling(mut self, skip: bool) -> Self {
        self.skip_loader_error_bubbling = skip;
        self
    }

    pub fn skip_revalidation(mut self, skip: bool) -> Self {
        self.skip_revalidation = skip;
        self
    }

    pub fn context(mut self, context: RouterContextProvider) -> Self {
        self.context = Some(context);
        self
    }

    fn wants(&self, route_id: &str) -> bool {
        self.route_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == route_id))
    }
}

// ============================================================================
// Results
// ============================================================================

/// Everything a server render needs.
#[derive(Debug)]
pub struct StaticHandlerContext {
    pub basename: String,
    pub location: Location,
    pub matches: Vec<RouteMatch>,
    pub loader_data: HashMap<String, Value>,
    pub action_data: Option<HashMap<String, Value>>,
    pub errors: Option<HashMap<String, RouteError>>,
    pub status_code: u16,
    pub loader_headers: HashMap<String, HeaderMap>,
    pub action_headers: HashMap<String, HeaderMap>,
    /// Loader results with keys still pending; their immediate keys are
    /// already in `loader_data`
    pub deferred: HashMap<String, DeferredData>,
}

impl StaticHandlerContext {
    fn new(basename: &str, location: Location, matches: Vec<RouteMatch>) -> Self {
        Self {
            basename: basename.to_string(),
            location,
            matches,
            loader_data: HashMap::new(),
            action_data: None,
            errors: None,
            status_code: 200,
            loader_headers: HashMap::new(),
            action_headers: HashMap::new(),
            deferred: HashMap::new(),
        }
    }

    pub fn route_error(&self, route_id: &str) -> Option<&RouteError> {
        self.errors.as_ref().and_then(|errors| errors.get(route_id))
    }
}

/// Outcome of [`StaticHandler::query`].
#[derive(Debug)]
pub enum QueryResult {
    Context(StaticHandlerContext),
    /// A redirect raised by an action or loader
    Response(Response),
}

/// Re-attribute a failure that happened while rendering `failed_route_id` to
/// the nearest boundary at or above it, for a second render attempt.
///
/// Data of routes below the boundary is dropped since they no longer render.
pub fn context_from_error(
    mut context: StaticHandlerContext,
    failed_route_id: &str,
    error: RouteError,
) -> StaticHandlerContext {
    let boundary_id = find_nearest_boundary(&context.matches, Some(failed_route_id))
        .map_or_else(|| failed_route_id.to_string(), |m| m.route.id.clone());
    let below: Vec<String> = context
        .matches
        .iter()
        .skip_while(|m| m.route.id != boundary_id)
        .skip(1)
        .map(|m| m.route.id.clone())
        .collect();
    for id in &below {
        context.loader_data.remove(id);
        context.deferred.remove(id);
    }
    debug_log!("Render error in '{}' attributed to '{}'", failed_route_id, boundary_id);
    context.status_code = error.status();
    context.errors = Some(HashMap::from([(boundary_id, error)]));
    context
}

// ============================================================================
// StaticHandler
// ============================================================================

/// Runs route handlers for one request at a time.
#[derive(Clone)]
pub struct StaticHandler {
    routes: Arc<DataRoutes>,
    basename: String,
    strategy: Arc<dyn DataStrategy>,
    context: Option<ContextFactory>,
}

impl StaticHandler {
    pub fn new(routes: Vec<Route>, options: StaticHandlerOptions) -> Result<Self, RouterError> {
        Ok(Self::from_routes(Arc::new(DataRoutes::new(routes)?), options))
    }

    /// Share an already built route tree, for example with a client router.
    pub fn from_routes(routes: Arc<DataRoutes>, options: StaticHandlerOptions) -> Self {
        Self {
            routes,
            basename: options.basename,
            strategy: options.data_strategy,
            context: options.context,
        }
    }

    pub fn routes(&self) -> &Arc<DataRoutes> {
        &self.routes
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Run the action (for mutations) and the loaders of every matched route.
    pub async fn query(&self, request: Request, options: QueryOptions) -> Result<QueryResult, RouterError> {
        let location = Location::initial(&request.path());
        let signal = request.signal().clone();
        let method = request.method().clone();
        let url = request.url().to_string();
        debug_log!("Query {} {}", method, url);

        let result = if !is_valid_method(&method) {
            let error = ErrorResponse::method_not_allowed(method.as_str(), &location.pathname, None);
            QueryResult::Context(self.error_context(location, short_circuit_matches(&self.routes), error.into()))
        } else {
            match match_routes(&self.routes, &location.href(), &self.basename) {
                None => {
                    debug_log!("No routes match '{}'", location.pathname);
                    let error = ErrorResponse::not_found(&location.pathname);
                    QueryResult::Context(self.error_context(location, short_circuit_matches(&self.routes), error.into()))
                }
                Some(matches) => {
                    let context = options.context.clone().unwrap_or_else(|| self.new_context());
                    if request.is_mutation() {
                        self.submit(request, location, matches, &options, context).await
                    } else {
                        let limit = matches.len();
                        self.load(request, location, matches, limit, &options, context, Pending::default())
                            .await
                    }
                }
            }
        };

        if signal.is_cancelled() {
            return Err(RouterError::Aborted {
                method: method.to_string(),
                url,
            });
        }
        Ok(result)
    }

    /// Run the action or loader of a single route: the one named by
    /// `route_id`, else the URL's target route. Used for resource routes and
    /// fetchers.
    pub async fn query_route(&self, request: Request, route_id: Option<&str>) -> Result<DataResult, RouterError> {
        let location = Location::initial(&request.path());
        let signal = request.signal().clone();
        let method = request.method().clone();
        let url = request.url().to_string();

        if !is_valid_method(&method) {
            let error = ErrorResponse::method_not_allowed(method.as_str(), &location.pathname, None);
            return Ok(error_result(error));
        }
        let Some(matches) = match_routes(&self.routes, &location.href(), &self.basename) else {
            return Ok(error_result(ErrorResponse::not_found(&location.pathname)));
        };
        let target = match route_id {
            Some(id) => matches.iter().find(|m| m.route.id == id),
            None => get_target_match(&matches, &location.search),
        };
        let Some(target) = target else {
            let message = format!(
                "Route \"{}\" does not match URL \"{}\"",
                route_id.unwrap_or_default(),
                location.pathname
            );
            return Ok(error_result(ErrorResponse::new(403, message)));
        };
        let target_id = target.route.id.clone();

        let kind = if request.is_mutation() {
            HandlerKind::Action
        } else {
            HandlerKind::Loader
        };
        if kind == HandlerKind::Loader && !target.route.has_loader() {
            let message = format!(
                "You made a {} request to \"{}\" but did not provide a `loader` for route \"{}\", so there is no way to handle the request.",
                method, location.pathname, target_id
            );
            return Ok(error_result(ErrorResponse::bad_request(message)));
        }

        trace_log!("Query route '{}' ({})", target_id, kind);
        let args = DataStrategyArgs {
            request,
            matches: flag_matches(&matches, |m| m.route.id == target_id),
            params: leaf_params(&matches),
            context: self.new_context(),
            kind,
            fetcher_key: None,
        };
        let result = take_result(run_data_strategy(Arc::clone(&self.strategy), args).await, &target_id);
        if signal.is_cancelled() {
            return Err(RouterError::Aborted {
                method: method.to_string(),
                url,
            });
        }
        Ok(result)
    }

    async fn submit(
        &self,
        request: Request,
        location: Location,
        matches: Vec<RouteMatch>,
        options: &QueryOptions,
        context: RouterContextProvider,
    ) -> QueryResult {
        let target_id = get_target_match(&matches, &location.search)
            .map(|m| m.route.id.clone())
            .unwrap_or_default();
        let args = DataStrategyArgs {
            request: request.clone(),
            matches: flag_matches(&matches, |m| m.route.id == target_id),
            params: leaf_params(&matches),
            context: context.clone(),
            kind: HandlerKind::Action,
            fetcher_key: None,
        };
        let result = take_result(run_data_strategy(Arc::clone(&self.strategy), args).await, &target_id)
            .settle()
            .await;
        let loader_request = request.derive(Method::GET, request.url().clone(), RequestBody::Empty);

        match ActionResult::from(result) {
            ActionResult::Redirect(redirect) => {
                debug_log!("Action of '{}' redirected to '{}'", target_id, redirect.location);
                QueryResult::Response(redirect.to_response())
            }
            ActionResult::Error { error, headers } => {
                let boundary_id = find_nearest_boundary(&matches, Some(&target_id))
                    .map_or_else(|| target_id.clone(), |m| m.route.id.clone());
                debug_log!("Action of '{}' failed; rendering at '{}'", target_id, boundary_id);
                let mut pending = Pending::default();
                if !headers.is_empty() {
                    pending.action_headers.insert(target_id, headers);
                }
                if options.skip_revalidation {
                    let mut context = StaticHandlerContext::new(&self.basename, location, matches);
                    context.status_code = error.status();
                    context.errors = Some(HashMap::from([(boundary_id, error)]));
                    context.action_headers = pending.action_headers;
                    return QueryResult::Context(context);
                }
                let limit = get_loader_matches_until_boundary(&matches, &boundary_id).len();
                pending.action_error = Some((boundary_id, error));
                self.load(loader_request, location, matches, limit, options, context, pending)
                    .await
            }
            ActionResult::Data { data, status, headers } => {
                let mut pending = Pending {
                    action_data: Some(HashMap::from([(target_id.clone(), data)])),
                    action_status: status,
                    ..Pending::default()
                };
                if !headers.is_empty() {
                    pending.action_headers.insert(target_id, headers);
                }
                if options.skip_revalidation {
                    let mut context = StaticHandlerContext::new(&self.basename, location, matches);
                    context.status_code = status.unwrap_or(200);
                    context.action_data = pending.action_data;
                    context.action_headers = pending.action_headers;
                    return QueryResult::Context(context);
                }
                let limit = matches.len();
                self.load(loader_request, location, matches, limit, options, context, pending)
                    .await
            }
        }
    }

    /// Run the loaders of the first `limit` matches.
    #[allow(clippy::too_many_arguments)]
    async fn load(
        &self,
        request: Request,
        location: Location,
        matches: Vec<RouteMatch>,
        limit: usize,
        options: &QueryOptions,
        context: RouterContextProvider,
        pending: Pending,
    ) -> QueryResult {
        let to_load: Vec<DataStrategyMatch> = matches
            .iter()
            .enumerate()
            .map(|(index, m)| DataStrategyMatch {
                should_load: index < limit && m.route.has_loader() && options.wants(&m.route.id),
                route_match: m.clone(),
            })
            .collect();

        let results = if to_load.iter().any(|m| m.should_load) {
            let args = DataStrategyArgs {
                request,
                matches: to_load,
                params: leaf_params(&matches),
                context,
                kind: HandlerKind::Loader,
                fetcher_key: None,
            };
            run_data_strategy(Arc::clone(&self.strategy), args).await
        } else {
            DataResults::new()
        };

        if let Some(redirect) = find_redirect(&matches, &results) {
            debug_log!("Loader redirected query to '{}'", redirect.location);
            return QueryResult::Response(redirect.to_response());
        }

        let had_action_error = pending.action_error.is_some();
        let processed = process_loader_data(
            &matches,
            results,
            pending.action_error,
            options.skip_loader_error_bubbling,
        );
        let status_code = match pending.action_status {
            Some(status) if processed.errors.is_none() && !had_action_error => status,
            _ => processed.status_code,
        };

        let mut context = StaticHandlerContext::new(&self.basename, location, matches);
        context.loader_data = processed.loader_data;
        context.errors = processed.errors;
        context.status_code = status_code;
        context.loader_headers = processed.loader_headers;
        context.deferred = processed.deferred;
        context.action_data = pending.action_data;
        context.action_headers = pending.action_headers;
        QueryResult::Context(context)
    }

    fn error_context(&self, location: Location, matches: Vec<RouteMatch>, error: RouteError) -> StaticHandlerContext {
        let mut context = StaticHandlerContext::new(&self.basename, location, matches);
        context.status_code = error.status();
        if let Some(root) = context.matches.first() {
            context.errors = Some(HashMap::from([(root.route.id.clone(), error)]));
        }
        context
    }

    fn new_context(&self) -> RouterContextProvider {
        match &self.context {
            Some(factory) => factory(),
            None => RouterContextProvider::new(),
        }
    }
}

impl fmt::Debug for StaticHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHandler")
            .field("routes", &self.routes.len())
            .field("basename", &self.basename)
            .finish()
    }
}

/// A settled action result.
enum ActionResult {
    Data {
        data: Value,
        status: Option<u16>,
        headers: HeaderMap,
    },
    Error {
        error: RouteError,
        headers: HeaderMap,
    },
    Redirect(Redirect),
}

impl From<DataResult> for ActionResult {
    fn from(result: DataResult) -> Self {
        match result {
            DataResult::Data { data, status, headers } => Self::Data { data, status, headers },
            DataResult::Deferred {
                deferred,
                status,
                headers,
            } => Self::Data {
                data: Value::Object(deferred.immediate().clone()),
                status,
                headers,
            },
            DataResult::Error { error, headers, .. } => Self::Error { error, headers },
            DataResult::Redirect(redirect) => Self::Redirect(redirect),
        }
    }
}

/// What the action left for the loader pass.
#[derive(Default)]
struct Pending {
    action_data: Option<HashMap<String, Value>>,
    action_status: Option<u16>,
    action_headers: HashMap<String, HeaderMap>,
    action_error: Option<(String, RouteError)>,
}

fn error_result(error: ErrorResponse) -> DataResult {
    DataResult::Error {
        status: Some(error.status),
        error: error.into(),
        headers: HeaderMap::new(),
    }
}

fn is_valid_method(method: &Method) -> bool {
    *method == Method::HEAD || FormMethod::from_method(method).is_some()
}

fn flag_matches(matches: &[RouteMatch], should_load: impl Fn(&RouteMatch) -> bool) -> Vec<DataStrategyMatch> {
    matches
        .iter()
        .map(|m| DataStrategyMatch {
            should_load: should_load(m),
            route_match: m.clone(),
        })
        .collect()
}

/// The target's result; a middleware failure may have landed on another route.
fn take_result(mut results: DataResults, target_id: &str) -> DataResult {
    match results.remove(target_id) {
        Some(result) => result,
        None => results
            .into_values()
            .next()
            .unwrap_or_else(|| DataResult::data(Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Thrown;
    use crate::request::FormData;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn routes(parent_loads: Arc<AtomicUsize>) -> Vec<Route> {
        vec![Route::new("/")
            .id("root")
            .error_boundary(true)
            .loader(|_| async { Ok(json!("root")) })
            .children(vec![
                Route::new("parent")
                    .id("parent")
                    .loader(move |_| {
                        let parent_loads = Arc::clone(&parent_loads);
                        async move {
                            parent_loads.fetch_add(1, Ordering::SeqCst);
                            Ok(json!("parent"))
                        }
                    })
                    .children(vec![Route::new("child")
                        .id("child")
                        .loader(|_| async { Ok(json!("child")) })
                        .action(|args| async move {
                            match args.request.form_data().and_then(|f| f.get("intent")) {
                                Some("fail") => Err(Thrown::message("mutation failed")),
                                Some("leave") => Ok(Response::redirect("/parent")),
                                _ => Ok(Response::json(json!({"ok": true}))),
                            }
                        })]),
                Route::new("forbidden")
                    .id("forbidden")
                    .loader(|_| async { Err::<Value, _>(Thrown::status(403, "nope")) }),
                Route::new("api/ping")
                    .id("ping")
                    .loader(|_| async { Ok(json!({"pong": true})) }),
            ])]
    }

    fn handler() -> (StaticHandler, Arc<AtomicUsize>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let loads = Arc::new(AtomicUsize::new(0));
        let handler = StaticHandler::new(routes(Arc::clone(&loads)), StaticHandlerOptions::new()).unwrap();
        (handler, loads)
    }

    fn post(path: &str, intent: &str) -> Request {
        Request::post(
            &format!("http://localhost{}", path),
            RequestBody::Form(FormData::new().field("intent", intent)),
        )
        .unwrap()
    }

    fn context(result: QueryResult) -> StaticHandlerContext {
        match result {
            QueryResult::Context(context) => context,
            QueryResult::Response(response) => panic!("unexpected response {:?}", response),
        }
    }

    #[tokio::test]
    async fn test_query_runs_matched_loaders() {
        let (handler, _) = handler();
        let request = Request::get("http://localhost/parent/child").unwrap();
        let context = context(handler.query(request, QueryOptions::new()).await.unwrap());
        assert_eq!(context.status_code, 200);
        assert_eq!(context.loader_data.len(), 3);
        assert_eq!(context.loader_data["child"], json!("child"));
        assert!(context.errors.is_none());
        assert_eq!(context.location.pathname, "/parent/child");
    }

    #[tokio::test]
    async fn test_query_unknown_path_is_404() {
        let (handler, _) = handler();
        let request = Request::get("http://localhost/missing").unwrap();
        let context = context(handler.query(request, QueryOptions::new()).await.unwrap());
        assert_eq!(context.status_code, 404);
        assert_eq!(context.route_error("root").map(RouteError::status), Some(404));
    }

    #[tokio::test]
    async fn test_query_rejects_unknown_method() {
        let (handler, _) = handler();
        let url = url::Url::parse("http://localhost/").unwrap();
        let request = Request::new(Method::OPTIONS, url);
        let context = context(handler.query(request, QueryOptions::new()).await.unwrap());
        assert_eq!(context.status_code, 405);
    }

    #[tokio::test]
    async fn test_loader_error_status_and_bubbling() {
        let (handler, _) = handler();
        let request = Request::get("http://localhost/forbidden").unwrap();
        let bubbled = context(handler.query(request, QueryOptions::new()).await.unwrap());
        assert_eq!(bubbled.status_code, 403);
        assert!(bubbled.route_error("root").is_some());
        assert!(!bubbled.loader_data.contains_key("forbidden"));

        let request = Request::get("http://localhost/forbidden").unwrap();
        let unbubbled = context(
            handler
                .query(request, QueryOptions::new().skip_loader_error_bubbling(true))
                .await
                .unwrap(),
        );
        assert!(unbubbled.route_error("forbidden").is_some());
        assert!(unbubbled.route_error("root").is_none());
    }

    #[tokio::test]
    async fn test_route_ids_filter_loaders() {
        let (handler, loads) = handler();
        let request = Request::get("http://localhost/parent/child").unwrap();
        let context = context(
            handler
                .query(request, QueryOptions::new().route_ids(["child"]))
                .await
                .unwrap(),
        );
        assert_eq!(context.loader_data.keys().collect::<Vec<_>>(), vec!["child"]);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_data_then_loaders() {
        let (handler, loads) = handler();
        let context = context(handler.query(post("/parent/child", "save"), QueryOptions::new()).await.unwrap());
        assert_eq!(context.action_data.unwrap()["child"], json!({"ok": true}));
        assert_eq!(context.loader_data["parent"], json!("parent"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_without_revalidation() {
        let (handler, loads) = handler();
        let context = context(
            handler
                .query(post("/parent/child", "save"), QueryOptions::new().skip_revalidation(true))
                .await
                .unwrap(),
        );
        assert!(context.action_data.is_some());
        assert!(context.loader_data.is_empty());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_error_wipes_routes_below_boundary() {
        let (handler, loads) = handler();
        let context = context(handler.query(post("/parent/child", "fail"), QueryOptions::new()).await.unwrap());
        assert_eq!(context.status_code, 500);
        assert_eq!(
            context.route_error("root"),
            Some(&RouteError::exception("mutation failed"))
        );
        assert!(!context.loader_data.contains_key("child"));
        assert!(!context.loader_data.contains_key("parent"));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_redirect_is_a_response() {
        let (handler, _) = handler();
        let result = handler.query(post("/parent/child", "leave"), QueryOptions::new()).await.unwrap();
        let QueryResult::Response(response) = result else {
            panic!("expected a redirect");
        };
        assert_eq!(response.status(), 302);
        assert_eq!(response.location(), Some("/parent"));
    }

    #[tokio::test]
    async fn test_submission_without_action_is_405() {
        let (handler, _) = handler();
        let context = context(handler.query(post("/parent", "save"), QueryOptions::new()).await.unwrap());
        assert_eq!(context.status_code, 405);
        assert!(context.route_error("root").is_some());
    }

    #[tokio::test]
    async fn test_aborted_query_is_an_error() {
        let (handler, _) = handler();
        let request = Request::get("http://localhost/parent").unwrap();
        request.signal().cancel();
        let result = handler.query(request, QueryOptions::new()).await;
        assert!(matches!(result, Err(RouterError::Aborted { .. })));
    }

    #[tokio::test]
    async fn test_query_route_targets_one_route() {
        let (handler, loads) = handler();
        let request = Request::get("http://localhost/api/ping").unwrap();
        let result = handler.query_route(request, None).await.unwrap();
        assert!(matches!(result, DataResult::Data { ref data, .. } if *data == json!({"pong": true})));

        let request = Request::get("http://localhost/api/ping").unwrap();
        let result = handler.query_route(request, Some("parent")).await.unwrap();
        assert_eq!(result.status(), Some(403));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_from_error_finds_boundary() {
        let (handler, _) = handler();
        let request = Request::get("http://localhost/parent/child").unwrap();
        let context = context(handler.query(request, QueryOptions::new()).await.unwrap());
        let context = context_from_error(context, "child", RouteError::exception("render failed"));
        assert_eq!(context.status_code, 500);
        assert!(context.route_error("root").is_some());
        assert_eq!(context.loader_data.keys().collect::<Vec<_>>(), vec!["root"]);
    }
}
