//! Loader and action execution shared by the client router and the static
//! handler
//!
//! Handlers produce a [`HandlerResult`]; the pipeline normalizes it into a
//! [`DataResult`] (data, deferred data, redirect or error), runs every
//! handler of a request through a [`DataStrategy`] wrapped in the matched
//! routes' middleware, and finally folds the per-route results into loader
//! data and bubbled errors.

use crate::context::RouterContextProvider;
use crate::error::{ErrorResponse, RouteError, Thrown};
use crate::manifest::DataRoute;
use crate::matcher::RouteMatch;
use crate::middleware::{run_middleware, BoxedMiddleware, MiddlewareError};
use crate::params::RouteParams;
use crate::request::{Request, Response, RELOAD_DOCUMENT_HEADER, REPLACE_HEADER};
use crate::route::{DataFunctionArgs, HandlerKind, HandlerOutput, HandlerResult};
use crate::{debug_log, trace_log};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Per-route results keyed by route id.
pub type DataResults = HashMap<String, DataResult>;

// ============================================================================
// Results
// ============================================================================

/// A redirect requested by a loader, action or middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub status: u16,
    #[serde(rename = "redirect")]
    pub location: String,
    /// Revalidate every loader after following
    #[serde(default)]
    pub revalidate: bool,
    /// Follow with a full document load
    #[serde(default, rename = "reload")]
    pub reload_document: bool,
    /// Replace the current history entry
    #[serde(default)]
    pub replace: bool,
}

impl Redirect {
    pub fn new(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: location.into(),
            revalidate: false,
            reload_document: false,
            replace: false,
        }
    }

    /// Read a redirect from a response; `None` unless it has a redirect
    /// status and a `Location`.
    pub fn from_response(response: &Response) -> Option<Self> {
        if !response.is_redirect() {
            return None;
        }
        Some(Self {
            status: response.status(),
            location: response.location()?.to_string(),
            revalidate: response.requests_revalidation(),
            reload_document: response.has_header(&RELOAD_DOCUMENT_HEADER),
            replace: response.has_header(&REPLACE_HEADER),
        })
    }

    /// The equivalent HTTP response.
    pub fn to_response(&self) -> Response {
        let mut response = Response::redirect_with_status(&self.location, self.status);
        if self.revalidate {
            response = response.with_header(crate::request::REVALIDATE_HEADER, "yes");
        }
        if self.reload_document {
            response = response.with_header(RELOAD_DOCUMENT_HEADER, "true");
        }
        if self.replace {
            response = response.with_header(REPLACE_HEADER, "true");
        }
        response
    }
}

/// Data with some keys still pending.
///
/// ```
/// use datarouter::{DeferredData, RouteError};
/// use serde_json::json;
///
/// let deferred = DeferredData::new()
///     .value("title", "Dashboard")
///     .defer("stats", async { Ok::<_, RouteError>(json!({"visits": 3})) });
/// let value = pollster::block_on(deferred.resolve()).unwrap();
/// assert_eq!(value, json!({"title": "Dashboard", "stats": {"visits": 3}}));
/// ```
#[derive(Default)]
pub struct DeferredData {
    data: Map<String, Value>,
    pending: Vec<(String, BoxFuture<'static, Result<Value, RouteError>>)>,
}

impl DeferredData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an immediately available value.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Add a value that settles later.
    pub fn defer<F, T, E>(mut self, key: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Value>,
        E: Into<RouteError>,
    {
        let future = future.map(|result| result.map(Into::into).map_err(Into::into));
        self.pending.push((key.into(), future.boxed()));
        self
    }

    /// Values available now.
    pub fn immediate(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn pending_keys(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|(key, _)| key.as_str())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Map<String, Value>,
        Vec<(String, BoxFuture<'static, Result<Value, RouteError>>)>,
    ) {
        (self.data, self.pending)
    }

    /// Await every pending key. The first rejection fails the whole value.
    pub async fn resolve(self) -> Result<Value, RouteError> {
        let (mut data, pending) = self.into_parts();
        let (keys, futures): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        for (key, settled) in keys.into_iter().zip(join_all(futures).await) {
            data.insert(key, settled?);
        }
        Ok(Value::Object(data))
    }
}

impl fmt::Debug for DeferredData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredData")
            .field("data", &self.data)
            .field("pending", &self.pending_keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The normalized outcome of one loader or action.
#[derive(Debug)]
pub enum DataResult {
    Data {
        data: Value,
        status: Option<u16>,
        headers: HeaderMap,
    },
    Deferred {
        deferred: DeferredData,
        status: Option<u16>,
        headers: HeaderMap,
    },
    Redirect(Redirect),
    Error {
        error: RouteError,
        status: Option<u16>,
        headers: HeaderMap,
    },
}

impl DataResult {
    pub fn data(data: Value) -> Self {
        Self::Data {
            data,
            status: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn error(error: impl Into<RouteError>) -> Self {
        Self::Error {
            error: error.into(),
            status: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect(_))
    }

    /// Explicit status from a returned or thrown response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Data { status, .. } | Self::Deferred { status, .. } | Self::Error { status, .. } => {
                *status
            }
            Self::Redirect(redirect) => Some(redirect.status),
        }
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Data { headers, .. } | Self::Deferred { headers, .. } | Self::Error { headers, .. } => {
                Some(headers)
            }
            Self::Redirect(_) => None,
        }
    }

    /// Await deferred keys, turning the result into plain data, or into an
    /// error when a key rejects.
    pub async fn settle(self) -> Self {
        match self {
            Self::Deferred {
                deferred,
                status,
                headers,
            } => match deferred.resolve().await {
                Ok(data) => Self::Data { data, status, headers },
                Err(error) => Self::Error { error, status, headers },
            },
            other => other,
        }
    }
}

/// Normalize what a handler produced.
pub async fn to_data_result(result: HandlerResult) -> DataResult {
    match result {
        Ok(HandlerOutput::Data(data)) => DataResult::data(data),
        Ok(HandlerOutput::Deferred(deferred)) => DataResult::Deferred {
            deferred,
            status: None,
            headers: HeaderMap::new(),
        },
        Ok(HandlerOutput::Response(response)) => {
            if let Some(redirect) = Redirect::from_response(&response) {
                return DataResult::Redirect(redirect);
            }
            let status = response.status();
            let headers = response.headers().clone();
            match response.body_value().await {
                Ok(data) => DataResult::Data {
                    data,
                    status: Some(status),
                    headers,
                },
                Err(e) => DataResult::Error {
                    error: RouteError::exception(e.to_string()),
                    status: Some(500),
                    headers,
                },
            }
        }
        Err(thrown) => thrown_to_data_result(thrown).await,
    }
}

/// Normalize a thrown value: redirects stay redirects, responses become
/// route error responses.
pub async fn thrown_to_data_result(thrown: Thrown) -> DataResult {
    match thrown {
        Thrown::Response(response) => {
            if let Some(redirect) = Redirect::from_response(&response) {
                return DataResult::Redirect(redirect);
            }
            let status = response.status();
            let headers = response.headers().clone();
            DataResult::Error {
                error: RouteError::Response(response.into_error_response().await),
                status: Some(status),
                headers,
            }
        }
        Thrown::Error(error) => DataResult::error(error),
    }
}

// ============================================================================
// Handler invocation
// ============================================================================

/// Run one route's loader or action.
///
/// A route without a loader contributes `null`; a submission to a route
/// without an action is a 405.
pub fn call_route_handler(
    route: &Arc<DataRoute>,
    kind: HandlerKind,
    request: Request,
    params: RouteParams,
    context: RouterContextProvider,
) -> BoxFuture<'static, DataResult> {
    let Some(handler) = route.handler(kind).cloned() else {
        return match kind {
            HandlerKind::Loader => futures::future::ready(DataResult::data(Value::Null)).boxed(),
            HandlerKind::Action => {
                let error = ErrorResponse::method_not_allowed(
                    request.method().as_str(),
                    request.url().path(),
                    Some(&route.id),
                );
                futures::future::ready(DataResult::Error {
                    error: error.into(),
                    status: Some(405),
                    headers: HeaderMap::new(),
                })
                .boxed()
            }
        };
    };

    trace_log!("Calling {} for route '{}'", kind, route.id);
    let args = DataFunctionArgs {
        request,
        params,
        context,
    };
    async move { to_data_result(handler(args).await).await }.boxed()
}

// ============================================================================
// Strategy
// ============================================================================

/// A matched route as seen by a data strategy.
#[derive(Debug, Clone)]
pub struct DataStrategyMatch {
    pub route_match: RouteMatch,
    /// Whether this route's handler should run for this request
    pub should_load: bool,
}

impl DataStrategyMatch {
    pub fn route_id(&self) -> &str {
        &self.route_match.route.id
    }
}

/// Everything a strategy needs to run the handlers of one request.
#[derive(Debug, Clone)]
pub struct DataStrategyArgs {
    pub request: Request,
    /// Every matched route, root to leaf
    pub matches: Vec<DataStrategyMatch>,
    pub params: RouteParams,
    pub context: RouterContextProvider,
    pub kind: HandlerKind,
    /// Set when the request belongs to a fetcher
    pub fetcher_key: Option<String>,
}

impl DataStrategyArgs {
    /// Matches whose handler should run.
    pub fn to_load(&self) -> impl Iterator<Item = &DataStrategyMatch> {
        self.matches.iter().filter(|m| m.should_load)
    }
}

/// Decides how the handlers of a request are executed.
///
/// The default runs them in-process in parallel; the single-fetch client
/// strategy replaces that with one request to the data endpoint.
pub trait DataStrategy: Send + Sync + 'static {
    fn call(&self, args: DataStrategyArgs) -> BoxFuture<'static, Result<DataResults, Thrown>>;
}

/// Runs every handler in-process, concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDataStrategy;

impl DataStrategy for DefaultDataStrategy {
    fn call(&self, args: DataStrategyArgs) -> BoxFuture<'static, Result<DataResults, Thrown>> {
        let futures: Vec<_> = args
            .to_load()
            .map(|m| {
                let id = m.route_id().to_string();
                let future = call_route_handler(
                    &m.route_match.route,
                    args.kind,
                    args.request.clone(),
                    args.params.clone(),
                    args.context.clone(),
                );
                future.map(move |result| (id, result))
            })
            .collect();
        async move { Ok(join_all(futures).await.into_iter().collect()) }.boxed()
    }
}

/// Run a strategy wrapped in the middleware of every matched route.
///
/// A middleware or strategy failure is attributed to the route whose
/// middleware threw, or to the deepest route that was loading.
pub async fn run_data_strategy(
    strategy: Arc<dyn DataStrategy>,
    args: DataStrategyArgs,
) -> DataResults {
    let chain: Vec<(String, BoxedMiddleware)> = args
        .matches
        .iter()
        .flat_map(|m| {
            m.route_match
                .route
                .middleware
                .iter()
                .map(move |mw| (m.route_id().to_string(), Arc::clone(mw)))
        })
        .collect();
    let fallback_id = args
        .to_load()
        .last()
        .or_else(|| args.matches.last())
        .map(|m| m.route_id().to_string())
        .unwrap_or_default();

    let outcome = if chain.is_empty() {
        strategy.call(args).await.map_err(|thrown| MiddlewareError {
            route_id: None,
            thrown,
        })
    } else {
        let request = args.request.clone();
        let params = args.params.clone();
        let context = args.context.clone();
        run_middleware(chain, request, params, context, move |context| {
            strategy.call(DataStrategyArgs { context, ..args })
        })
        .await
    };

    match outcome {
        Ok(results) => results,
        Err(MiddlewareError { route_id, thrown }) => {
            let route_id = route_id.unwrap_or(fallback_id);
            debug_log!("Data strategy failed at route '{}'", route_id);
            let mut results = DataResults::new();
            results.insert(route_id, thrown_to_data_result(thrown).await);
            results
        }
    }
}

// ============================================================================
// Error bubbling and loader data
// ============================================================================

/// The nearest route at or above `route_id` that renders an error boundary,
/// falling back to the root match. A `route_id` that is not in `matches`
/// resolves to the root.
pub fn find_nearest_boundary<'a>(matches: &'a [RouteMatch], route_id: Option<&str>) -> Option<&'a RouteMatch> {
    let end = match route_id {
        Some(id) => matches.iter().position(|m| m.route.id == id).map_or(0, |i| i + 1),
        None => matches.len(),
    };
    matches[..end]
        .iter()
        .rev()
        .find(|m| m.route.has_error_boundary)
        .or_else(|| matches.first())
}

/// Matches strictly above `boundary_id`; all of them when it is absent.
pub fn get_loader_matches_until_boundary<'a>(matches: &'a [RouteMatch], boundary_id: &str) -> &'a [RouteMatch] {
    match matches.iter().position(|m| m.route.id == boundary_id) {
        Some(index) => &matches[..index],
        None => matches,
    }
}

/// Loader results folded into state-shaped maps.
#[derive(Debug, Default)]
pub struct ProcessedLoaderData {
    pub loader_data: HashMap<String, Value>,
    pub errors: Option<HashMap<String, RouteError>>,
    pub status_code: u16,
    pub loader_headers: HashMap<String, HeaderMap>,
    /// Deferred results, kept for streaming
    pub deferred: HashMap<String, DeferredData>,
    /// Routes whose previous data must not survive a merge
    pub cleared: Vec<String>,
}

/// Fold loader results (in match order) into loader data and errors.
///
/// Errors bubble to the nearest boundary unless `skip_bubbling` is set. A
/// pending action error is reported at the first loader error's boundary, or
/// at its own boundary when no loader failed; in that case the boundary's
/// loader data is cleared.
pub fn process_loader_data(
    matches: &[RouteMatch],
    mut results: DataResults,
    pending_action_error: Option<(String, RouteError)>,
    skip_bubbling: bool,
) -> ProcessedLoaderData {
    let mut processed = ProcessedLoaderData {
        status_code: 200,
        ..ProcessedLoaderData::default()
    };
    let mut errors: HashMap<String, RouteError> = HashMap::new();
    let mut pending_action_error = pending_action_error;
    let mut found_error = false;
    let mut data_status: Option<u16> = None;

    for route_match in matches {
        let id = &route_match.route.id;
        let Some(result) = results.remove(id) else {
            continue;
        };
        match result {
            DataResult::Error {
                error,
                status,
                headers,
            } => {
                let boundary_id = if skip_bubbling {
                    id.clone()
                } else {
                    find_nearest_boundary(matches, Some(id))
                        .map_or_else(|| id.clone(), |m| m.route.id.clone())
                };
                let error = match pending_action_error.take() {
                    Some((_, action_error)) => action_error,
                    None => error,
                };
                if !found_error {
                    found_error = true;
                    processed.status_code = status.unwrap_or_else(|| error.status());
                }
                errors.entry(boundary_id).or_insert(error);
                if !headers.is_empty() {
                    processed.loader_headers.insert(id.clone(), headers);
                }
            }
            DataResult::Data { data, status, headers } => {
                processed.loader_data.insert(id.clone(), data);
                if let Some(status) = status.filter(|s| *s != 200) {
                    data_status = Some(status);
                }
                if !headers.is_empty() {
                    processed.loader_headers.insert(id.clone(), headers);
                }
            }
            DataResult::Deferred {
                deferred,
                status,
                headers,
            } => {
                processed
                    .loader_data
                    .insert(id.clone(), Value::Object(deferred.immediate().clone()));
                processed.deferred.insert(id.clone(), deferred);
                if let Some(status) = status.filter(|s| *s != 200) {
                    data_status = Some(status);
                }
                if !headers.is_empty() {
                    processed.loader_headers.insert(id.clone(), headers);
                }
            }
            DataResult::Redirect(redirect) => {
                trace_log!("Ignoring redirect to '{}' while folding loader data", redirect.location);
            }
        }
    }

    if let Some((boundary_id, action_error)) = pending_action_error {
        processed.status_code = action_error.status();
        processed.loader_data.remove(&boundary_id);
        processed.deferred.remove(&boundary_id);
        processed.cleared.push(boundary_id.clone());
        errors = HashMap::from([(boundary_id, action_error)]);
        found_error = true;
    }
    if !found_error {
        if let Some(status) = data_status {
            processed.status_code = status;
        }
    }
    processed.errors = (!errors.is_empty()).then_some(errors);
    processed
}

/// Combine fresh loader data with what the previous state held.
///
/// Routes that did not reload keep their data when they have a loader,
/// unless listed in `cleared`. Nothing below the first route holding an error
/// is kept.
pub fn merge_loader_data(
    previous: &HashMap<String, Value>,
    fresh: &HashMap<String, Value>,
    cleared: &[String],
    matches: &[RouteMatch],
    errors: Option<&HashMap<String, RouteError>>,
) -> HashMap<String, Value> {
    let mut merged = HashMap::new();
    for route_match in matches {
        let id = &route_match.route.id;
        if let Some(value) = fresh.get(id) {
            merged.insert(id.clone(), value.clone());
        } else if route_match.route.has_loader() && !cleared.contains(id) {
            if let Some(value) = previous.get(id) {
                merged.insert(id.clone(), value.clone());
            }
        }
        if errors.is_some_and(|errors| errors.contains_key(id)) {
            break;
        }
    }
    merged
}

/// First redirect among `results`, in match order.
pub fn find_redirect(matches: &[RouteMatch], results: &DataResults) -> Option<Redirect> {
    matches
        .iter()
        .filter_map(|m| results.get(&m.route.id))
        .find_map(|result| match result {
            DataResult::Redirect(redirect) => Some(redirect.clone()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Exception;
    use crate::manifest::DataRoutes;
    use crate::matcher::match_routes;
    use crate::route::Route;
    use serde_json::json;

    fn routes() -> DataRoutes {
        DataRoutes::new(vec![Route::new("/")
            .id("root")
            .error_boundary(true)
            .loader(|_| async { Ok(json!("root")) })
            .child(
                Route::new("parent")
                    .id("parent")
                    .loader(|_| async { Ok(json!("parent")) })
                    .child(
                        Route::new("child")
                            .id("child")
                            .loader(|_| async { Err::<Value, _>(Thrown::message("boom")) }),
                    ),
            )])
        .unwrap()
    }

    fn strategy_args(routes: &DataRoutes, path: &str) -> DataStrategyArgs {
        let matches = match_routes(routes, path, "/").unwrap();
        DataStrategyArgs {
            request: Request::get(&format!("http://localhost{}", path)).unwrap(),
            params: matches.last().map(|m| m.params.clone()).unwrap_or_default(),
            matches: matches
                .into_iter()
                .map(|route_match| DataStrategyMatch {
                    route_match,
                    should_load: true,
                })
                .collect(),
            context: RouterContextProvider::new(),
            kind: HandlerKind::Loader,
            fetcher_key: None,
        }
    }

    #[test]
    fn test_redirect_from_response() {
        let redirect = Redirect::from_response(&Response::redirect_revalidate("/login")).unwrap();
        assert_eq!(redirect.status, 302);
        assert_eq!(redirect.location, "/login");
        assert!(redirect.revalidate);
        assert!(!redirect.replace);
        assert!(Redirect::from_response(&Response::json(json!(1))).is_none());

        let value = serde_json::to_value(&redirect).unwrap();
        assert_eq!(
            value,
            json!({"status": 302, "redirect": "/login", "revalidate": true, "reload": false, "replace": false})
        );
    }

    #[tokio::test]
    async fn test_thrown_response_becomes_error_response() {
        let result = thrown_to_data_result(Thrown::Response(Response::json(json!("gone")).with_status(410))).await;
        match result {
            DataResult::Error { error, status, .. } => {
                assert_eq!(status, Some(410));
                assert_eq!(error, RouteError::Response(ErrorResponse::new(410, json!("gone"))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_returned_response_is_data_with_status() {
        let result = to_data_result(Ok(HandlerOutput::Response(
            Response::json(json!({"ok": false})).with_status(422),
        )))
        .await;
        assert!(matches!(result, DataResult::Data { status: Some(422), .. }));
    }

    #[tokio::test]
    async fn test_deferred_rejection_settles_to_error() {
        let deferred = DeferredData::new()
            .value("a", 1)
            .defer("b", async { Err::<Value, _>(Exception::new("late")) });
        let result = DataResult::Deferred {
            deferred,
            status: None,
            headers: HeaderMap::new(),
        }
        .settle()
        .await;
        assert!(matches!(result, DataResult::Error { error: RouteError::Exception(_), .. }));
    }

    #[tokio::test]
    async fn test_default_strategy_and_bubbling() {
        let routes = routes();
        let args = strategy_args(&routes, "/parent/child");
        let matches: Vec<RouteMatch> = args.matches.iter().map(|m| m.route_match.clone()).collect();
        let results = run_data_strategy(Arc::new(DefaultDataStrategy), args).await;
        assert_eq!(results.len(), 3);

        let processed = process_loader_data(&matches, results, None, false);
        let errors = processed.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("root"));
        assert_eq!(processed.status_code, 500);

        let merged = merge_loader_data(&HashMap::new(), &processed.loader_data, &[], &matches, Some(&errors));
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["root"]);
    }

    #[tokio::test]
    async fn test_skip_bubbling_keeps_error_on_thrower() {
        let routes = routes();
        let args = strategy_args(&routes, "/parent/child");
        let matches: Vec<RouteMatch> = args.matches.iter().map(|m| m.route_match.clone()).collect();
        let results = run_data_strategy(Arc::new(DefaultDataStrategy), args).await;
        let processed = process_loader_data(&matches, results, None, true);
        assert!(processed.errors.unwrap().contains_key("child"));
    }

    #[test]
    fn test_pending_action_error_wins() {
        let routes = routes();
        let matches = match_routes(&routes, "/parent/child", "/").unwrap();
        let processed = process_loader_data(
            &matches,
            DataResults::new(),
            Some(("root".to_string(), RouteError::exception("action failed"))),
            false,
        );
        assert_eq!(processed.cleared, vec!["root".to_string()]);
        let errors = processed.errors.unwrap();
        assert_eq!(errors.get("root"), Some(&RouteError::exception("action failed")));
        assert_eq!(processed.status_code, 500);

        let previous = HashMap::from([("root".to_string(), json!("old root"))]);
        let merged = merge_loader_data(&previous, &processed.loader_data, &processed.cleared, &matches, Some(&errors));
        assert!(merged.is_empty());
    }

    #[test]
    fn test_pending_action_error_taken_by_loader_error_keeps_data() {
        let routes = routes();
        let matches = match_routes(&routes, "/parent/child", "/").unwrap();
        let results = DataResults::from([
            ("root".to_string(), DataResult::data(json!("fresh root"))),
            ("child".to_string(), DataResult::error(RouteError::exception("loader failed"))),
        ]);
        let processed = process_loader_data(
            &matches,
            results,
            Some(("root".to_string(), RouteError::exception("action failed"))),
            false,
        );
        assert!(processed.cleared.is_empty());
        assert_eq!(processed.loader_data.get("root"), Some(&json!("fresh root")));
        assert_eq!(
            processed.errors.unwrap().get("root"),
            Some(&RouteError::exception("action failed"))
        );
    }

    #[test]
    fn test_merge_keeps_unchanged_loaders() {
        let routes = routes();
        let matches = match_routes(&routes, "/parent", "/").unwrap();
        let previous = HashMap::from([
            ("root".to_string(), json!("old root")),
            ("parent".to_string(), json!("old parent")),
            ("gone".to_string(), json!("stale")),
        ]);
        let fresh = HashMap::from([("parent".to_string(), json!("new parent"))]);
        let merged = merge_loader_data(&previous, &fresh, &[], &matches, None);
        assert_eq!(merged.get("root"), Some(&json!("old root")));
        assert_eq!(merged.get("parent"), Some(&json!("new parent")));
        assert!(!merged.contains_key("gone"));
    }

    #[test]
    fn test_boundary_lookup() {
        let routes = routes();
        let matches = match_routes(&routes, "/parent/child", "/").unwrap();
        assert_eq!(find_nearest_boundary(&matches, Some("child")).unwrap().route.id, "root");
        assert_eq!(find_nearest_boundary(&matches, Some("elsewhere")).unwrap().route.id, "root");
        assert_eq!(find_nearest_boundary(&matches[1..], Some("elsewhere")).unwrap().route.id, "parent");
        assert_eq!(find_nearest_boundary(&matches[1..], None).unwrap().route.id, "parent");
        let above = get_loader_matches_until_boundary(&matches, "parent");
        assert_eq!(above.len(), 1);
        assert_eq!(get_loader_matches_until_boundary(&matches, "root").len(), 0);
    }
}
